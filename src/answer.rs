//! Question answering over retrieved repositories.
//!
//! [`answer`] retrieves the three closest repositories, renders them into
//! a context block and hands it to the completion service. It always
//! produces text: retrieval or completion failures come back as a
//! readable message.

use std::fmt::Write as _;

use tracing::warn;

use github_trend_core::embedding::truncate_chars;
use github_trend_core::star_history::StarHistory;

use crate::completion::CompletionProvider;
use crate::retrieval::{RetrievedRepo, Retriever};

/// Repositories placed in the context block.
pub const ANSWER_REPOS: usize = 3;
/// README characters per repository in the context block.
pub const README_SUMMARY_CHARS: usize = 500;
/// Star history points per repository in the context block.
pub const HISTORY_POINTS: usize = 5;
/// Contributors per repository in the context block.
pub const CONTRIBUTORS_SHOWN: usize = 3;

pub const SYSTEM_PROMPT: &str = "You are an expert assistant for GitHub projects who analyzes \
and recommends open source repositories. Base your answer on the repository information \
provided, and be precise and professional.";

pub const NO_RESULTS_MESSAGE: &str = "No GitHub repositories relevant to your question were \
found. Try different keywords.";

/// Answer `query` from indexed repositories. Never fails.
pub async fn answer(
    retriever: &Retriever,
    completion: &dyn CompletionProvider,
    query: &str,
    extra_context: Option<&str>,
) -> String {
    let hits = match retriever.search(query, ANSWER_REPOS).await {
        Ok(hits) => hits,
        Err(e) => {
            warn!(error = %e, "retrieval failed");
            return format!("Error while generating the answer: {:#}", e);
        }
    };
    if hits.is_empty() {
        return NO_RESULTS_MESSAGE.to_string();
    }

    let prompt = build_prompt(query, &hits, extra_context);
    match completion.complete(SYSTEM_PROMPT, &prompt).await {
        Ok(text) => text,
        Err(e) => {
            warn!(model = completion.model_name(), error = %e, "completion failed");
            format!("Error while generating the answer: {:#}", e)
        }
    }
}

/// User prompt: the context block followed by the question.
pub fn build_prompt(query: &str, hits: &[RetrievedRepo], extra_context: Option<&str>) -> String {
    let mut context = String::from("Repositories related to the question:\n\n");

    for (i, hit) in hits.iter().enumerate() {
        let Some(details) = &hit.details else {
            continue;
        };
        let _ = writeln!(context, "{}. Repository: {}", i + 1, hit.repo_name);
        let description = if details.description.is_empty() {
            "no description"
        } else {
            details.description.as_str()
        };
        let _ = writeln!(context, "   Description: {}", description);
        let _ = writeln!(context, "   Stars: {}", details.stars);
        let _ = writeln!(
            context,
            "   Language: {}",
            details.language.as_deref().unwrap_or("unknown")
        );

        if !details.top_contributors.is_empty() {
            let names: Vec<String> = details
                .top_contributors
                .iter()
                .take(CONTRIBUTORS_SHOWN)
                .map(|c| format!("{} ({} commits)", c.login, c.contributions))
                .collect();
            let _ = writeln!(context, "   Top contributors: {}", names.join(", "));
        }

        if !hit.star_history.is_empty() {
            let _ = write!(context, "{}", format_star_history(&hit.star_history));
        }

        if !hit.readme_excerpt.is_empty() {
            let summary = truncate_chars(&hit.readme_excerpt, README_SUMMARY_CHARS);
            let ellipsis = if hit.readme_truncated || summary.len() < hit.readme_excerpt.len() {
                "..."
            } else {
                ""
            };
            let _ = writeln!(context, "   README summary: {}{}", summary, ellipsis);
        }
        context.push('\n');
    }

    if let Some(extra) = extra_context.filter(|s| !s.trim().is_empty()) {
        let _ = writeln!(context, "\nAdditional information: {}", extra);
    }

    format!(
        "Answer the user's question using the GitHub repository information below.\n\n\
         Context:\n{}\n\
         Question: {}\n\n\
         Give a detailed and accurate answer that cites specific repositories. \
         If the information is insufficient, say so. Analyze the projects and offer useful insight.\n",
        context, query
    )
}

fn format_star_history(history: &StarHistory) -> String {
    let mut out = String::from("   Star history:\n");
    for (date, count) in history.sample(HISTORY_POINTS) {
        let _ = writeln!(out, "   - {}: {} stars", date, count);
    }
    out
}
