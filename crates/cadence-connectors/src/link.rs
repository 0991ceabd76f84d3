//! PR → work-item back-linking.
//!
//! A pull request references a work item when its title or source branch
//! carries the vendor's issue-id pattern (`PROJ-42` or `#512`). Matching is
//! case-insensitive on both sides.

use std::collections::HashMap;

use regex::Regex;
use tracing::debug;
use uuid::Uuid;

use cadence_core::tenant::TenantContext;

use crate::Result;

fn issue_key_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b([A-Z][A-Z0-9]*-\d+)\b|#(\d+)").expect("valid regex")
    })
}

/// All candidate issue keys in a text, lowercased: `proj-42` for key form,
/// `512` for `#512` form.
pub fn extract_issue_keys(text: &str) -> Vec<String> {
    issue_key_regex()
        .captures_iter(text)
        .filter_map(|caps| {
            caps.get(1)
                .map(|m| m.as_str().to_ascii_lowercase())
                .or_else(|| caps.get(2).map(|m| m.as_str().to_string()))
        })
        .collect()
}

/// Scan the source's pull requests and attach the first work item whose
/// external id matches a key found in the PR title or source branch. Work
/// items from every source in the tenant are candidates, since the PRs of a
/// code host usually reference the issues of a tracker source.
pub async fn link_pull_requests(ctx: &TenantContext, source_id: Uuid) -> Result<usize> {
    let items = ctx.store.list_work_items().await?;
    let by_external: HashMap<String, Uuid> = items
        .iter()
        .map(|i| (i.external_id.to_ascii_lowercase(), i.id))
        .collect();

    let mut linked = 0usize;
    for pr in ctx.store.list_pull_requests_for_source(source_id).await? {
        if pr.work_item_id.is_some() {
            continue;
        }
        let haystack = format!("{} {}", pr.title, pr.source_branch);
        for key in extract_issue_keys(&haystack) {
            if let Some(item_id) = by_external.get(&key) {
                ctx.store
                    .link_pull_request_work_item(pr.id, Some(*item_id))
                    .await?;
                debug!(pr = %pr.external_id, key, "linked pull request to work item");
                linked += 1;
                break;
            }
        }
    }
    Ok(linked)
}
