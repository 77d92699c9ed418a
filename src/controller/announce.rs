// Announcement rendering
// Fills the configured templates for the chat/overlay collaborators

use crate::config::AnnounceConfig;
use super::ActionKind;

/// Values available to announcement templates
pub struct AnnounceContext<'a> {
    pub user: &'a str,
    pub rate: f64,
    pub pre_count_bars: u32,
}

/// Substitute {user}, {rate}, {percent} and {bars} placeholders
pub fn render(template: &str, ctx: &AnnounceContext) -> String {
    let percent = (ctx.rate * 100.0).round() as i64;
    template
        .replace("{user}", ctx.user)
        .replace("{rate}", &format_rate(ctx.rate))
        .replace("{percent}", &percent.to_string())
        .replace("{bars}", &ctx.pre_count_bars.to_string())
}

/// Pick the template for an action kind
pub fn template_for(config: &AnnounceConfig, kind: ActionKind) -> &str {
    match kind {
        ActionKind::SpeedUp => &config.speed_up,
        ActionKind::SlowDown => &config.slow_down,
        ActionKind::Chaos => &config.chaos,
        ActionKind::Reset => &config.reset,
        ActionKind::SetExact => &config.set_exact,
    }
}

/// Trim trailing zeros so 1.50 reads as "1.5" and 1.00 as "1"
fn format_rate(rate: f64) -> String {
    let s = format!("{:.2}", rate);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_substitution() {
        let ctx = AnnounceContext {
            user: "alice",
            rate: 1.5,
            pre_count_bars: 2,
        };
        let out = render("{user} -> {rate}x ({percent}%), {bars} bar count-in", &ctx);
        assert_eq!(out, "alice -> 1.5x (150%), 2 bar count-in");
    }

    #[test]
    fn test_unknown_placeholders_left_alone() {
        let ctx = AnnounceContext {
            user: "bob",
            rate: 1.0,
            pre_count_bars: 1,
        };
        assert_eq!(render("{user} {nope}", &ctx), "bob {nope}");
    }

    #[test]
    fn test_rate_formatting() {
        assert_eq!(format_rate(1.0), "1");
        assert_eq!(format_rate(1.5), "1.5");
        assert_eq!(format_rate(1.25), "1.25");
        assert_eq!(format_rate(0.75), "0.75");
    }

    #[test]
    fn test_template_selection() {
        let config = AnnounceConfig::default();
        assert!(template_for(&config, ActionKind::Chaos).contains("dice"));
    }
}
