//! Button-oriented interaction for pages whose inputs live outside forms.

use crate::association::associate;
use crate::driver::WaitPolicy;
use crate::interaction::Interaction;
use crate::recorder::ActionKind;
use tracing::{debug, info, warn};

pub const SWEEP_BUTTON_SELECTOR: &str = "button";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ButtonSweepOutcome {
    pub buttons_clicked: usize,
    pub fields_filled: usize,
    pub failed_buttons: usize,
}

/// Press every button on `page_url` once, in document order.
///
/// The page is reloaded before each button so every click starts from the
/// same state, and buttons are re-queried after each reload. The sweep ends
/// when the index runs past the buttons present or a reload fails.
pub async fn sweep_buttons(
    interaction: &Interaction<'_>,
    page_url: &str,
    page_label: &str,
) -> ButtonSweepOutcome {
    let mut outcome = ButtonSweepOutcome::default();
    let driver = interaction.driver;

    for index in 0.. {
        if let Err(e) = interaction
            .bounded("reloading the page", driver.goto(page_url, WaitPolicy::NetworkIdle))
            .await
        {
            warn!("Reload of {} for button {} failed: {}", page_url, index, e);
            break;
        }
        interaction.settle().await;

        let buttons = match interaction
            .bounded("querying buttons", driver.query_all(None, SWEEP_BUTTON_SELECTOR))
            .await
        {
            Ok(buttons) => buttons,
            Err(e) => {
                warn!("Button query on {} failed: {}", page_url, e);
                break;
            }
        };
        let Some(button) = buttons.into_iter().nth(index) else {
            debug!("No button at index {} on {}", index, page_url);
            break;
        };
        let text = button.display_text();
        debug!("Processing button {} '{}' on {}", index, text, page_url);

        match interaction
            .bounded("associating inputs", associate(driver, &button))
            .await
        {
            Ok(Some(association)) => {
                debug!(
                    "Button '{}' acts on {:?} via {:?}",
                    text,
                    association.input_ids(),
                    association.tier
                );
                outcome.fields_filled += interaction.fill_inputs(&association.inputs).await;
            }
            Ok(None) => debug!("Button '{}' has no associated inputs", text),
            Err(e) => warn!("Input association for '{}' failed: {}", text, e),
        }

        interaction.highlight(&button).await;
        match interaction.click_and_wait(&button).await {
            Ok(navigated) => {
                if !navigated {
                    interaction.clear_highlight(&button).await;
                }
                interaction.settle().await;
                outcome.buttons_clicked += 1;
                interaction
                    .capture(
                        ActionKind::ButtonClick,
                        format!("Clicked button '{}' on {}", text, page_label),
                        page_url,
                    )
                    .await;
                info!("Clicked button '{}' on {}", text, page_url);
            }
            Err(e) => {
                warn!("Click on button '{}' at {} failed: {}", text, page_url, e);
                outcome.failed_buttons += 1;
            }
        }
    }

    outcome
}
