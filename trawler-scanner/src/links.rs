//! Link walk: highlight each outbound link, follow it, and come back.

use crate::driver::{ElementRef, WaitPolicy};
use crate::interaction::Interaction;
use crate::normalize::{NormalizedUrl, normalize};
use crate::recorder::ActionKind;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkWalkOutcome {
    pub links_followed: usize,
    pub failed_links: usize,
}

/// Follow every link in `links` from `page_url`, in order.
///
/// The anchor is looked up again on each pass since the page is reloaded
/// after every hop. A click that fails, or a link whose anchor is gone,
/// falls back to loading the link directly. The walk stops early if the
/// page cannot be reloaded.
pub async fn walk_links(
    interaction: &Interaction<'_>,
    page_url: &str,
    links: &[NormalizedUrl],
) -> LinkWalkOutcome {
    let mut outcome = LinkWalkOutcome::default();
    let driver = interaction.driver;

    for link in links {
        let anchor = find_anchor(interaction, page_url, link).await;
        let text = anchor
            .as_ref()
            .map(ElementRef::display_text)
            .unwrap_or_else(|| "<no-text>".to_string());

        let mut followed = false;
        if let Some(ref anchor) = anchor {
            interaction.highlight(anchor).await;
            interaction
                .capture(
                    ActionKind::LinkHighlight,
                    format!("Highlight link '{}' on {}", text, page_url),
                    page_url,
                )
                .await;
            match interaction.click_and_wait(anchor).await {
                Ok(navigated) => {
                    debug!("Clicked link '{}' (navigated: {})", text, navigated);
                    followed = true;
                }
                Err(e) => debug!("Click on link '{}' failed, loading it instead: {}", text, e),
            }
        } else {
            debug!("No anchor for {} on {}, loading it directly", link, page_url);
        }

        if !followed {
            match interaction
                .bounded("following a link", driver.goto(link.as_str(), WaitPolicy::NetworkIdle))
                .await
            {
                Ok(()) => followed = true,
                Err(e) => {
                    warn!("Could not follow {} from {}: {}", link, page_url, e);
                    outcome.failed_links += 1;
                }
            }
        }

        if followed {
            interaction.settle().await;
            interaction
                .capture(ActionKind::Navigate, format!("Navigated to {}", link), page_url)
                .await;
            outcome.links_followed += 1;
            info!("Followed link '{}' to {}", text, link);
        }

        if let Err(e) = interaction
            .bounded("returning to the page", driver.goto(page_url, WaitPolicy::NetworkIdle))
            .await
        {
            warn!("Return to {} failed, ending link walk: {}", page_url, e);
            break;
        }
        interaction.settle().await;
    }

    outcome
}

/// First anchor on the current page whose href resolves to `link`, relative
/// to the URL the driver is showing.
async fn find_anchor(
    interaction: &Interaction<'_>,
    page_url: &str,
    link: &NormalizedUrl,
) -> Option<ElementRef> {
    let base = interaction
        .bounded("reading the current URL", interaction.driver.current_url())
        .await
        .unwrap_or_else(|_| page_url.to_string());
    let anchors = match interaction
        .bounded("querying links", interaction.driver.query_all(None, "a[href]"))
        .await
    {
        Ok(anchors) => anchors,
        Err(e) => {
            warn!("Link query on {} failed: {}", page_url, e);
            return None;
        }
    };
    anchors.into_iter().find(|anchor| {
        anchor
            .attr("href")
            .and_then(|href| normalize(href, &base))
            .is_some_and(|href| &href == link)
    })
}
