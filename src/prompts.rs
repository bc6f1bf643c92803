//! Prompt templates for site generation.
//!
//! Pure string construction; every prompt sent to the completion backend is
//! built here so the planner, generator, and heal loop stay free of inline
//! prose.
//!
//! ## Prompt Types
//!
//! - **Structure prompt**: ask for the file manifest of the target app
//! - **Ranking prompt**: rank manifest entries by importance
//! - **Content prompt**: generate one file, with per-filename constraints
//! - **Regeneration prompt**: repair one file given the error it caused

use crate::planner::FileSpec;

/// System prompt for any completion that must return raw file content.
pub const CODE_ONLY_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Generate only code without explanations, markdown, or backticks.";

/// System prompt for planning completions.
pub const PLANNER_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Build the structure-planning prompt: a JSON manifest of files for the
/// simplest Flask app satisfying the description.
pub fn structure_prompt(description: &str) -> String {
    format!(
        "Please write the simplest Flask app that will meet the requirements of the \
         following description. The website should be visually appealing and easy to use.\n\
         DESCRIPTION:\n\
         {}\n\n\
         Output the directory structure of the app. It should be a JSON list of files and \
         a description of the contents of each file.\n\
         EXAMPLE:\n\
         [\n\
         {{\"file_name\": \"app.py\", \"description\": \"This is the main file that will run the app.\"}},\n\
         {{\"file_name\": \"requirements.txt\", \"description\": \"This is the requirements file for the app.\"}},\n\
         {{\"file_name\": \"README.md\", \"description\": \"This is the README file for the app.\"}},\n\
         {{\"file_name\": \"templates/index.html\", \"description\": \"This is the template for the index page of the app.\"}},\n\
         {{\"file_name\": \"static/style.css\", \"description\": \"This is the CSS file for the app.\"}},\n\
         {{\"file_name\": \"static/script.js\", \"description\": \"This is the JavaScript file for the app.\"}}\n\
         ]\n\n\
         Do not include any other text. Do not include any markdown, code blocks, or explanations.\n\
         OUTPUT:",
        description
    )
}

/// Build the ranking prompt for a previously returned manifest.
pub fn ranking_prompt(structure_json: &str) -> String {
    format!(
        "Please rank the following files by importance, with 1 being the most important.\n\
         Output the result as a JSON list with the file name and its rank:\n\
         {}\n\n\
         Example output:\n\
         [\n\
         {{\"file_name\": \"app.py\", \"importance\": 1}},\n\
         {{\"file_name\": \"requirements.txt\", \"importance\": 2}}\n\
         ]\n\n\
         Do not include any other text. Do not include any markdown, code blocks, or explanations.",
        structure_json
    )
}

/// Build the content-generation prompt for a single file.
///
/// `app.py` and `requirements.txt` carry extra constraints: the generated
/// server must be reachable from outside the sandbox, and the dependency
/// list must stay installable.
pub fn file_content_prompt(spec: &FileSpec, description: &str) -> String {
    let mut prompt = format!(
        "Please write the file {} with the following description:\n\
         {}\n\n\
         The website description is:\n\
         {}\n",
        spec.path, spec.description, description
    );

    match spec.path.as_str() {
        "app.py" => {
            prompt.push_str(
                "\nIMPORTANT CONSTRAINTS:\n\
                 1. Make sure the Flask app is properly configured to run on all interfaces (0.0.0.0)\n\
                 2. Set debug=True during development\n\
                 3. Include error handlers for common HTTP errors\n\
                 4. Wrap route handlers in try/except blocks to prevent unhandled exceptions\n",
            );
        }
        "requirements.txt" => {
            prompt.push_str(
                "\nIMPORTANT CONSTRAINTS:\n\
                 1. Include only the absolute minimum required dependencies\n\
                 2. DO NOT include version numbers for any package\n\
                 3. Each dependency should be on its own line with no version constraints\n\
                 4. Include only well-established, widely-used packages\n",
            );
        }
        _ => {}
    }

    prompt.push_str(
        "\nGenerate only the file content without any markdown, code blocks, explanations, or backticks.",
    );
    prompt
}

/// Build the repair prompt for a file that caused an error in the sandbox.
pub fn regeneration_prompt(file_name: &str, error: &str, current_content: &str) -> String {
    format!(
        "The file {} needs to be fixed. When trying to use it, the following error occurred:\n\n\
         ERROR: {}\n\n\
         Current file content:\n\
         {}\n\n\
         Please fix the file and provide the corrected version. Generate only the file \
         content without any markdown, code blocks, explanations, or backticks.",
        file_name, error, current_content
    )
}
