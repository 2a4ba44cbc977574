//! Best-effort dismissal of cookie consent prompts.
//!
//! Each known consent platform is a typed [`ConsentRule`]. The automator asks
//! the rules in order whether their prompt is present on the page and lets the
//! first match opt out. Nothing here can fail a capture.

use crate::render::ScriptEvaluator;

/// How many rules are tried per page before giving up.
pub const MAX_CONSENT_CANDIDATES: usize = 6;

pub trait ConsentRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn detect(&self, page: &dyn ScriptEvaluator) -> anyhow::Result<bool>;

    /// Triggers the opt-out action. Returns whether anything was clicked or
    /// called.
    fn opt_out(&self, page: &dyn ScriptEvaluator) -> anyhow::Result<bool>;
}

fn truthy(value: serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::Null => false,
        serde_json::Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        serde_json::Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

fn eval_flag(page: &dyn ScriptEvaluator, script: &str) -> anyhow::Result<bool> {
    Ok(truthy(page.evaluate(script)?))
}

pub struct OneTrust;

impl ConsentRule for OneTrust {
    fn name(&self) -> &'static str {
        "onetrust"
    }

    fn detect(&self, page: &dyn ScriptEvaluator) -> anyhow::Result<bool> {
        eval_flag(
            page,
            "!!(document.querySelector('#onetrust-banner-sdk') || document.querySelector('#onetrust-consent-sdk'))",
        )
    }

    fn opt_out(&self, page: &dyn ScriptEvaluator) -> anyhow::Result<bool> {
        eval_flag(
            page,
            r#"(() => {
                const btn = document.querySelector('#onetrust-reject-all-handler');
                if (btn) { btn.click(); return true; }
                if (window.OneTrust && typeof window.OneTrust.RejectAll === 'function') {
                    window.OneTrust.RejectAll();
                    return true;
                }
                return false;
            })()"#,
        )
    }
}

pub struct Cookiebot;

impl ConsentRule for Cookiebot {
    fn name(&self) -> &'static str {
        "cookiebot"
    }

    fn detect(&self, page: &dyn ScriptEvaluator) -> anyhow::Result<bool> {
        eval_flag(
            page,
            "!!(document.querySelector('#CybotCookiebotDialog') || (window.Cookiebot && window.Cookiebot.dialog))",
        )
    }

    fn opt_out(&self, page: &dyn ScriptEvaluator) -> anyhow::Result<bool> {
        eval_flag(
            page,
            r#"(() => {
                const btn = document.querySelector('#CybotCookiebotDialogBodyButtonDecline');
                if (btn) { btn.click(); return true; }
                if (window.Cookiebot && typeof window.Cookiebot.decline === 'function') {
                    window.Cookiebot.decline();
                    return true;
                }
                return false;
            })()"#,
        )
    }
}

pub struct Didomi;

impl ConsentRule for Didomi {
    fn name(&self) -> &'static str {
        "didomi"
    }

    fn detect(&self, page: &dyn ScriptEvaluator) -> anyhow::Result<bool> {
        eval_flag(
            page,
            "!!(document.querySelector('#didomi-host') || window.Didomi)",
        )
    }

    fn opt_out(&self, page: &dyn ScriptEvaluator) -> anyhow::Result<bool> {
        eval_flag(
            page,
            r#"(() => {
                if (window.Didomi && typeof window.Didomi.setUserDisagreeToAll === 'function') {
                    window.Didomi.setUserDisagreeToAll();
                    return true;
                }
                const btn = document.querySelector('#didomi-notice-disagree-button');
                if (btn) { btn.click(); return true; }
                return false;
            })()"#,
        )
    }
}

pub struct Quantcast;

impl ConsentRule for Quantcast {
    fn name(&self) -> &'static str {
        "quantcast"
    }

    fn detect(&self, page: &dyn ScriptEvaluator) -> anyhow::Result<bool> {
        eval_flag(
            page,
            "!!document.querySelector('.qc-cmp2-container, #qc-cmp2-ui')",
        )
    }

    fn opt_out(&self, page: &dyn ScriptEvaluator) -> anyhow::Result<bool> {
        eval_flag(
            page,
            r#"(() => {
                const btn = document.querySelector('.qc-cmp2-summary-buttons button[mode=secondary]');
                if (btn) { btn.click(); return true; }
                return false;
            })()"#,
        )
    }
}

pub struct Usercentrics;

impl ConsentRule for Usercentrics {
    fn name(&self) -> &'static str {
        "usercentrics"
    }

    fn detect(&self, page: &dyn ScriptEvaluator) -> anyhow::Result<bool> {
        eval_flag(
            page,
            "!!(document.querySelector('#usercentrics-root') || window.UC_UI)",
        )
    }

    fn opt_out(&self, page: &dyn ScriptEvaluator) -> anyhow::Result<bool> {
        eval_flag(
            page,
            r#"(() => {
                if (window.UC_UI && typeof window.UC_UI.denyAllConsents === 'function') {
                    window.UC_UI.denyAllConsents();
                    return true;
                }
                return false;
            })()"#,
        )
    }
}

/// Looks for a visible button whose label reads like a refusal.
pub struct RejectButtonByText {
    labels: Vec<&'static str>,
}

impl Default for RejectButtonByText {
    fn default() -> Self {
        RejectButtonByText {
            labels: vec![
                "reject all",
                "reject",
                "decline",
                "deny",
                "only necessary",
                "necessary only",
                "refuse",
                "ablehnen",
                "alle ablehnen",
                "tout refuser",
                "rechazar",
            ],
        }
    }
}

impl RejectButtonByText {
    fn script(&self, click: bool) -> anyhow::Result<String> {
        let labels = serde_json::to_string(&self.labels)?;
        Ok(format!(
            r#"(() => {{
                const labels = {labels};
                const nodes = document.querySelectorAll('button, [role=button], a');
                for (const el of nodes) {{
                    const text = (el.innerText || el.textContent || '').trim().toLowerCase();
                    if (!text || text.length > 40) continue;
                    if (!labels.includes(text)) continue;
                    const rect = el.getBoundingClientRect();
                    if (rect.width === 0 || rect.height === 0) continue;
                    if ({click}) el.click();
                    return true;
                }}
                return false;
            }})()"#,
            labels = labels,
            click = click
        ))
    }
}

impl ConsentRule for RejectButtonByText {
    fn name(&self) -> &'static str {
        "reject-button-text"
    }

    fn detect(&self, page: &dyn ScriptEvaluator) -> anyhow::Result<bool> {
        eval_flag(page, &self.script(false)?)
    }

    fn opt_out(&self, page: &dyn ScriptEvaluator) -> anyhow::Result<bool> {
        eval_flag(page, &self.script(true)?)
    }
}

pub fn default_rules() -> Vec<Box<dyn ConsentRule>> {
    vec![
        Box::new(OneTrust),
        Box::new(Cookiebot),
        Box::new(Didomi),
        Box::new(Quantcast),
        Box::new(Usercentrics),
        Box::new(RejectButtonByText::default()),
    ]
}

pub struct ConsentAutomator {
    rules: Vec<Box<dyn ConsentRule>>,
    max_candidates: usize,
}

impl Default for ConsentAutomator {
    fn default() -> Self {
        ConsentAutomator::new(default_rules(), MAX_CONSENT_CANDIDATES)
    }
}

impl ConsentAutomator {
    pub fn new(rules: Vec<Box<dyn ConsentRule>>, max_candidates: usize) -> Self {
        ConsentAutomator {
            rules,
            max_candidates,
        }
    }

    /// Tries to dismiss a consent prompt on `page`. Returns the name of the
    /// rule that opted out, if any. Errors are logged and swallowed.
    pub fn run(&self, page: &dyn ScriptEvaluator, url: &str) -> Option<&'static str> {
        for rule in self.rules.iter().take(self.max_candidates) {
            match rule.detect(page) {
                Ok(false) => continue,
                Ok(true) => {}
                Err(e) => {
                    warn!("consent rule {} failed to detect on {}: {}", rule.name(), url, e);
                    continue;
                }
            }
            debug!("consent prompt {} detected on {}", rule.name(), url);
            return match rule.opt_out(page) {
                Ok(true) => {
                    info!("dismissed {} consent prompt on {}", rule.name(), url);
                    Some(rule.name())
                }
                Ok(false) => {
                    warn!("{} consent prompt on {} had nothing to click", rule.name(), url);
                    None
                }
                Err(e) => {
                    warn!("could not opt out of {} on {}: {}", rule.name(), url, e);
                    None
                }
            };
        }
        None
    }
}
