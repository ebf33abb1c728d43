//! Prompt assembly for the generation step.
//!
//! Retrieved fragments are rendered as numbered context blocks. The blocks
//! share a character budget: lower-ranked fragments are dropped first, and if
//! the best fragment alone is over budget its text is cut to fit.

use crate::models::{Query, RetrievedFragment};
use std::fmt::Write;

const INSTRUCTIONS: &str = "You recommend assessments from a product catalog.
Use only the catalog entries listed below. Recommend the entries that best match the user's request, most relevant first.
Respond with JSON only, using this shape:
{\"recommendations\": [{\"source_id\": \"<source_id of the entry>\", \"title\": \"<entry title>\", \"description\": \"<one or two sentences on why it fits>\"}], \"notes\": \"<optional remarks>\"}
If none of the entries fit, return an empty recommendations list and explain why in notes.";

/// Marker appended to a fragment whose text was cut.
const ELLIPSIS: &str = "...";

/// A rendered prompt and the fragments it actually contains.
#[derive(Debug, Clone)]
pub struct Prompt<'a> {
    pub text: String,
    /// Prefix of the ranked fragments that made it into the context
    pub fragments: &'a [RetrievedFragment],
}

#[derive(Debug, Clone, Copy)]
pub struct PromptBuilder {
    char_budget: usize,
}

impl PromptBuilder {
    pub fn new(char_budget: usize) -> Self {
        Self { char_budget }
    }

    /// Build the prompt. `fragments` must already be ranked best first.
    pub fn build<'a>(&self, query: &Query, fragments: &'a [RetrievedFragment]) -> Prompt<'a> {
        let mut blocks = Vec::with_capacity(fragments.len());
        let mut used = 0;

        for (i, fragment) in fragments.iter().enumerate() {
            let block = render_block(i + 1, fragment, &fragment.text);
            let len = block.chars().count();
            if used + len > self.char_budget {
                if i == 0 {
                    blocks.push(self.truncated_block(fragment));
                }
                break;
            }
            used += len;
            blocks.push(block);
        }

        let mut text = String::with_capacity(INSTRUCTIONS.len() + used + query.as_str().len() + 64);
        text.push_str(INSTRUCTIONS);
        text.push_str("\n\nCatalog entries:\n");
        for block in &blocks {
            text.push_str(block);
        }
        let _ = write!(text, "\nUser request: {}\n", query.as_str());

        Prompt {
            text,
            fragments: &fragments[..blocks.len()],
        }
    }

    /// Cut the top fragment's text so its block fits the budget.
    ///
    /// The header (`source_id` and title) is never cut. When the header alone
    /// is longer than the budget the block keeps no text and exceeds it.
    fn truncated_block(&self, fragment: &RetrievedFragment) -> String {
        let overhead = render_block(1, fragment, "").chars().count() + ELLIPSIS.len();
        let keep = self.char_budget.saturating_sub(overhead);
        let mut text: String = fragment.text.chars().take(keep).collect();
        text.push_str(ELLIPSIS);
        render_block(1, fragment, &text)
    }
}

fn render_block(rank: usize, fragment: &RetrievedFragment, text: &str) -> String {
    format!(
        "\n[{}] source_id: {}\ntitle: {}\n{}\n",
        rank,
        fragment.source_id,
        fragment.display_title(),
        text
    )
}
