//! Prompt text shared by all vision providers

use super::GridRequest;

/// How many cells the instruction expects to match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    Binary,
    Single,
    Multi,
}

impl SelectionMode {
    pub fn detect(instructions: &str) -> Self {
        let lowered = instructions.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let has = |candidates: &[&str]| words.iter().any(|w| candidates.iter().any(|c| c == w));

        if has(&["all", "every", "each", "multiple"]) {
            SelectionMode::Multi
        } else if has(&["one", "single", "which"]) {
            SelectionMode::Single
        } else {
            SelectionMode::Binary
        }
    }
}

const OUTPUT_FORMAT: &str = r#"Return only a JSON object with this exact structure:
{"challenge_prompt": "<instruction>", "coordinates": [{"box_2d": [row, col]}]}
Rows and columns are zero-indexed; [0, 0] is the top-left tile.
If no tile matches, return an empty coordinates array."#;

pub fn system_prompt(mode: SelectionMode) -> String {
    let task = match mode {
        SelectionMode::Binary => {
            "You solve grid-based image selection challenges. Identify which tiles match the \
             instruction. Prefer precision over recall: only select tiles that clearly match."
        }
        SelectionMode::Multi => {
            "You solve multi-select image challenges. Identify every tile that matches the \
             instruction, including partial or unusual views of the target."
        }
        SelectionMode::Single => {
            "You solve single-select image challenges. Identify the one tile that best \
             matches the instruction."
        }
    };
    format!("{task}\n\n{OUTPUT_FORMAT}")
}

pub fn user_prompt(request: &GridRequest) -> String {
    format!(
        "Grid dimensions: {rows}x{columns} ({total} images, given in row-major order).\n\
         Challenge instruction: \"{instruction}\"",
        rows = request.rows,
        columns = request.columns,
        total = request.images.len(),
        instruction = request.instructions.trim(),
    )
}
