//! Artifact file naming.

use std::path::Path;

use crate::{JobId, ResolutionTier, TaskKind, WorkInput};

/// Longest prompt-derived fragment kept in a file name.
pub const MAX_PREFIX_LEN: usize = 50;

const FORBIDDEN: &[char] = &['\\', '/', ':', '"', '*', '?', '<', '>', '|'];

/// Turn arbitrary prompt text into a file-name-safe fragment.
///
/// Drops path and shell metacharacters, collapses whitespace runs into `_`,
/// trims `_` at both ends and truncates to `max_len` characters. Falls back to
/// `"video"` when nothing is left.
pub fn sanitize_filename(raw: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_space = false;
    for c in raw.chars() {
        if FORBIDDEN.contains(&c) {
            continue;
        }
        if c.is_whitespace() {
            if !in_space {
                out.push('_');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        out.push(c);
    }

    let trimmed: String = out.trim_matches('_').chars().take(max_len).collect();
    if trimmed.is_empty() {
        "video".to_string()
    } else {
        trimmed
    }
}

/// Job id prefix for an attempt at an item.
pub fn job_prefix(kind: TaskKind, retry: bool) -> &'static str {
    match (kind, retry) {
        (_, true) => "retry",
        (TaskKind::PromptToVideo, false) => "prompt",
        (TaskKind::ImageToVideo, false) => "i2v",
    }
}

/// Name of the stored artifact for one finished item.
///
/// `tier` is the tier actually delivered, which is `Standard` when an upscale
/// fell back to the original artifact.
pub fn artifact_name(kind: TaskKind, tier: ResolutionTier, input: &WorkInput, job: &JobId) -> String {
    let prompt = sanitize_filename(input.prompt(), MAX_PREFIX_LEN);
    match kind {
        TaskKind::PromptToVideo => format!("{}_{}_{}.mp4", tier.label(), prompt, job),
        TaskKind::ImageToVideo => {
            let stem = input
                .image()
                .and_then(|image| Path::new(image).file_stem())
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "image".to_string());
            format!("I2V_{}_{}_{}_{}.mp4", tier.label(), prompt, stem, job)
        }
    }
}
