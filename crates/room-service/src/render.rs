//! Views pushed to connections.
//!
//! Payloads are opaque to the store and the bus. [`GaugeRenderer`] emits
//! htmx out-of-band fragments, swapped in by element id on the client.

use crate::store::RoomCounts;

/// Audio played on the ending screen.
pub const CLOSING_AUDIO_PATH: &str = "/closing-theme.mp3";

/// Produces the payload for each event kind.
pub trait Renderer: Send + Sync {
    /// View for a counts change.
    fn render(&self, counts: &RoomCounts) -> String;

    /// View sent once a room has triggered.
    fn render_triggered(&self) -> String;
}

/// Share of participants who voted, in percent.
#[must_use]
pub fn vote_percent(counts: &RoomCounts) -> f64 {
    if counts.total == 0 {
        return 0.0;
    }
    // Counts are far below 2^53
    #[allow(clippy::cast_precision_loss)]
    let percent = counts.votes as f64 / counts.total as f64 * 100.0;
    percent
}

/// Status line for a vote share.
#[must_use]
pub fn status_text(percent: f64) -> &'static str {
    if percent >= 50.0 {
        "Time to go"
    } else if percent >= 26.0 {
        "Getting there"
    } else {
        "Too early"
    }
}

/// Gauge and ending-screen htmx fragments.
#[derive(Debug, Default, Clone, Copy)]
pub struct GaugeRenderer;

impl Renderer for GaugeRenderer {
    fn render(&self, counts: &RoomCounts) -> String {
        if counts.triggered {
            return self.render_triggered();
        }

        let percent = vote_percent(counts);
        format!(
            r#"
<div id="gauge-container" hx-swap-oob="true">
	<div class="gauge">
		<div class="gauge-fill" style="width: {percent:.1}%;"></div>
	</div>
	<p class="status-text">{status} <span class="anonym-info">(anonymous)</span></p>
</div>
"#,
            status = status_text(percent)
        )
    }

    fn render_triggered(&self) -> String {
        format!(
            r#"
<div id="main-ui" hx-swap-oob="true" class="triggered-mode">
	<div class="ending-screen">
		<h1 class="ending-title">That's a wrap for today</h1>
		<p class="ending-sub">Please head out</p>
		<audio autoplay loop src="{CLOSING_AUDIO_PATH}"></audio>
	</div>
</div>
"#
        )
    }
}
