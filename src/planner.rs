//! Structure planner — turns a site description into a ranked file manifest.
//!
//! Two completions: the first proposes the manifest, the second ranks it by
//! importance. `app.py` and `requirements.txt` are always present in the
//! result regardless of what the model proposes, because the deploy and
//! launch steps depend on them. A ranking response that fails to parse
//! degrades to manifest order rather than failing the build.

use serde::{Deserialize, Serialize};

use crate::errors::LlmError;
use crate::llm::{ChatMessage, CompletionBackend};
use crate::prompts;
use crate::util::extract_json_array;

/// Files the rest of the pipeline requires unconditionally.
pub const ESSENTIAL_FILES: &[&str] = &["app.py", "requirements.txt"];

/// One entry of the site manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSpec {
    #[serde(rename = "file_name")]
    pub path: String,
    pub description: String,
    #[serde(default, rename = "importance")]
    pub rank: Option<u32>,
}

impl FileSpec {
    /// Synthetic entry for an essential file the model left out.
    fn essential(path: &str) -> Self {
        Self {
            path: path.to_string(),
            description: format!("This is the {} file for the app.", path),
            rank: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RankEntry {
    file_name: String,
    importance: u32,
}

/// Parse a manifest from model output, tolerating surrounding prose and
/// markdown fences. Duplicate paths keep the first occurrence.
pub fn parse_manifest(output: &str) -> Result<Vec<FileSpec>, LlmError> {
    let json = extract_json_array(output).ok_or_else(|| LlmError::InvalidResponse {
        reason: "no JSON array found in structure response".to_string(),
    })?;
    let specs: Vec<FileSpec> =
        serde_json::from_str(&json).map_err(|e| LlmError::InvalidResponse {
            reason: format!("structure response did not match the manifest schema: {}", e),
        })?;

    let mut seen = std::collections::HashSet::new();
    Ok(specs
        .into_iter()
        .filter(|spec| seen.insert(spec.path.clone()))
        .collect())
}

/// Append any missing essential files to the manifest.
pub fn ensure_essential_files(specs: &mut Vec<FileSpec>) {
    for essential in ESSENTIAL_FILES {
        if !specs.iter().any(|spec| spec.path == *essential) {
            specs.push(FileSpec::essential(essential));
        }
    }
}

/// Apply a ranking response to the manifest and sort by rank ascending,
/// unranked entries last. The sort is stable, so ties keep manifest order.
pub fn apply_ranking(specs: &mut [FileSpec], ranking_output: &str) -> bool {
    let Some(json) = extract_json_array(ranking_output) else {
        return false;
    };
    let Ok(entries) = serde_json::from_str::<Vec<RankEntry>>(&json) else {
        return false;
    };

    let ranks: std::collections::HashMap<&str, u32> = entries
        .iter()
        .map(|e| (e.file_name.as_str(), e.importance))
        .collect();
    for spec in specs.iter_mut() {
        if let Some(rank) = ranks.get(spec.path.as_str()) {
            spec.rank = Some(*rank);
        }
    }
    specs.sort_by_key(|spec| spec.rank.unwrap_or(u32::MAX));
    true
}

/// Plan the file structure for a site described in natural language.
pub async fn plan_structure(
    backend: &dyn CompletionBackend,
    description: &str,
) -> Result<Vec<FileSpec>, LlmError> {
    let mut messages = vec![
        ChatMessage::system(prompts::PLANNER_SYSTEM_PROMPT),
        ChatMessage::user(prompts::structure_prompt(description)),
    ];

    let structure_output = backend.complete(&messages).await?;
    let mut specs = parse_manifest(&structure_output)?;
    ensure_essential_files(&mut specs);

    // Second round: rank by importance, carrying the first exchange so the
    // model ranks exactly what it proposed.
    messages.push(ChatMessage::assistant(structure_output.clone()));
    messages.push(ChatMessage::user(prompts::ranking_prompt(&structure_output)));

    let ranking_output = backend.complete(&messages).await?;
    if !apply_ranking(&mut specs, &ranking_output) {
        tracing::warn!("ranking response did not parse, keeping manifest order");
    }

    tracing::info!(files = specs.len(), "planned site structure");
    Ok(specs)
}
