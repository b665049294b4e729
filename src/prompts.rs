//! Recognition prompts for the vision model.
//!
//! Every template lives here so a prompt regression is a one-file diff and
//! unit tests can inspect the exact text without calling a model.
//!
//! A template is selected by [`OcrMode`] and resolved once per run by
//! [`build_prompt`]; the resulting string is reused for every page.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Trigger phrase that switches Qwen-VL class models into their Markdown
/// document-parsing behaviour. Embedded in every template.
pub const BASE_TRIGGER: &str = "qwenvl markdown";

/// Placeholder in the templates below, replaced by [`BASE_TRIGGER`].
const BASE_SLOT: &str = "{base_mode}";

/// Heading that introduces a caller-supplied instruction.
const CUSTOM_HEADING: &str = "Additional requirements:";

/// Document type hint that selects a prompt template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrMode {
    /// General documents: structure, lists, tables.
    Document,
    /// Papers with formulas, citations and footnotes.
    #[default]
    Academic,
    /// Table-heavy pages.
    Table,
    /// Formula-heavy pages.
    Formula,
    /// Let the model decide per element.
    Mixed,
}

impl OcrMode {
    pub const ALL: [OcrMode; 5] = [
        OcrMode::Document,
        OcrMode::Academic,
        OcrMode::Table,
        OcrMode::Formula,
        OcrMode::Mixed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OcrMode::Document => "document",
            OcrMode::Academic => "academic",
            OcrMode::Table => "table",
            OcrMode::Formula => "formula",
            OcrMode::Mixed => "mixed",
        }
    }

    fn template(self) -> &'static str {
        match self {
            OcrMode::Document => DOCUMENT_PROMPT,
            OcrMode::Academic => ACADEMIC_PROMPT,
            OcrMode::Table => TABLE_PROMPT,
            OcrMode::Formula => FORMULA_PROMPT,
            OcrMode::Mixed => MIXED_PROMPT,
        }
    }
}

impl fmt::Display for OcrMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OcrMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        OcrMode::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown OCR mode '{s}'"))
    }
}

/// Academic papers. The default template.
pub const ACADEMIC_PROMPT: &str = r#"Convert this page of an academic document into high-quality Markdown.

Specific requirements:
1. COMPLETENESS: recognise every piece of text, including footnotes, headers and footers
2. FORMULAS: write mathematics in LaTeX, inline as $...$ and display as $$...$$
3. CITATIONS: keep reference numbers and bibliography formatting
4. FIGURES: keep figure and table captions and their explanatory text
5. STRUCTURE: identify section headings, appendices and the reference list accurately
6. LANGUAGES: recognise mixed Chinese and English text accurately
7. SYMBOLS: keep special symbols, superscripts, subscripts and Greek letters

{base_mode}

Output format:
- Use standard Markdown syntax
- Convert tables to Markdown tables
- Mark code blocks with ```language fences
- Do not omit anything; attempt to recognise blurry content as well"#;

/// General documents.
pub const DOCUMENT_PROMPT: &str = r#"Convert this document page into Markdown.

Requirements:
1. Keep the original structure (heading levels, paragraphs, lists)
2. Recognise all text accurately, including mixed Chinese and English
3. Keep tables as Markdown tables
4. Write mathematics in LaTeX ($...$ or $$...$$)
5. Mark images as ![description](path)
6. Do not omit any text

{base_mode}"#;

pub const TABLE_PROMPT: &str = r#"Convert this table-heavy document page into Markdown.

Focus on:
1. TABLE STRUCTURE: identify rows, columns and merged cells accurately
2. HEADERS: identify header rows correctly
3. DATA: do not drop the content of any cell
4. TITLES: keep table numbers and titles
5. NOTES: keep notes and remarks printed below a table

{base_mode}

For complex tables:
- Use Markdown table syntax
- Fall back to HTML table markup if Markdown cannot express the layout
- Leave empty cells blank or mark them with "-""#;

pub const FORMULA_PROMPT: &str = r#"Convert this formula-heavy document page into Markdown with embedded LaTeX.

Formula rules:
1. INLINE: single dollar signs, $formula$
2. DISPLAY: double dollar signs on their own line, $$formula$$
3. MATRICES: \begin{matrix}...\end{matrix} or \begin{bmatrix}...\end{bmatrix}
4. FRACTIONS: \frac{numerator}{denominator}
5. SCRIPTS: ^ for superscripts and _ for subscripts
6. GREEK LETTERS: LaTeX commands such as \alpha, \beta, \sum
7. OPERATORS: \int, \partial, \infty and similar
8. BRACKETS: \left( ... \right) for automatic sizing

{base_mode}

Use standard Markdown for the surrounding prose."#;

pub const MIXED_PROMPT: &str = r#"Convert this document page into Markdown, handling each kind of element automatically.

Rules:
1. TEXT: standard Markdown
2. TABLES: Markdown or HTML tables
3. FORMULAS: LaTeX ($...$ or $$...$$)
4. IMAGES: ![description](path)
5. CODE: ```language ... ``` fences
6. LISTS: keep ordered and unordered list structure

{base_mode}

Completeness and accuracy come first: do not omit any visible text."#;

/// Resolve `mode` into the prompt text sent with every page.
pub fn prompt_for(mode: OcrMode, custom_instruction: Option<&str>) -> String {
    let prompt = mode.template().replace(BASE_SLOT, BASE_TRIGGER);
    with_custom(prompt, custom_instruction)
}

/// Resolve a mode tag as typed by a user.
///
/// A recognised tag selects its template and an empty tag selects
/// [`OcrMode::Academic`]. Any other string is taken as a free-form
/// instruction placed after [`BASE_TRIGGER`].
pub fn build_prompt(mode: &str, custom_instruction: Option<&str>) -> String {
    let mode = mode.trim();
    if mode.is_empty() {
        return prompt_for(OcrMode::default(), custom_instruction);
    }
    match mode.parse::<OcrMode>() {
        Ok(m) => prompt_for(m, custom_instruction),
        Err(_) => {
            tracing::debug!("'{}' is not a known mode, using it as a free-form prompt", mode);
            with_custom(format!("{BASE_TRIGGER}\n\n{mode}"), custom_instruction)
        }
    }
}

fn with_custom(prompt: String, custom_instruction: Option<&str>) -> String {
    match custom_instruction.map(str::trim) {
        Some(extra) if !extra.is_empty() => format!("{prompt}\n\n{CUSTOM_HEADING}\n{extra}"),
        _ => prompt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_mode_embeds_trigger() {
        for mode in OcrMode::ALL {
            let p = prompt_for(mode, None);
            assert!(p.contains(BASE_TRIGGER), "{mode} is missing the trigger");
            assert!(!p.contains(BASE_SLOT), "{mode} left the slot unfilled");
        }
    }

    #[test]
    fn default_is_academic() {
        assert_eq!(OcrMode::default(), OcrMode::Academic);
        assert_eq!(build_prompt("", None), prompt_for(OcrMode::Academic, None));
    }

    #[test]
    fn formula_mentions_latex_delimiters() {
        let p = prompt_for(OcrMode::Formula, None);
        assert!(p.contains("$$formula$$"));
        assert!(p.contains(r"\frac"));
    }

    #[test]
    fn custom_instruction_is_appended() {
        let base = prompt_for(OcrMode::Table, None);
        let p = prompt_for(OcrMode::Table, Some("Keep currency symbols."));
        assert!(p.starts_with(&base));
        assert!(p.ends_with("Additional requirements:\nKeep currency symbols."));
    }

    #[test]
    fn blank_custom_instruction_is_ignored() {
        assert_eq!(
            prompt_for(OcrMode::Mixed, Some("   ")),
            prompt_for(OcrMode::Mixed, None)
        );
    }

    #[test]
    fn mode_tags_are_case_insensitive() {
        assert_eq!("FORMULA".parse::<OcrMode>(), Ok(OcrMode::Formula));
        assert_eq!(build_prompt(" Table ", None), prompt_for(OcrMode::Table, None));
    }

    #[test]
    fn unknown_mode_becomes_free_form() {
        let p = build_prompt("transcribe handwriting only", None);
        assert_eq!(p, "qwenvl markdown\n\ntranscribe handwriting only");
    }
}
