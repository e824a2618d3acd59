use crate::models::session::PlayerState;
use crate::services::browser_service::BrowserSession;
use crate::services::diagnostic_logger::Diagnostics;

const TAG: &str = "PLAYER";

/// Keeps the page's video element muted, hidden or shrunk as requested.
pub struct PlayerStateEnforcer {
    script: String,
    diagnostics: Diagnostics,
}

impl PlayerStateEnforcer {
    pub fn new(state: PlayerState, diagnostics: Diagnostics) -> Self {
        Self {
            script: build_player_script(&state),
            diagnostics,
        }
    }

    /// Idempotent; a missing video element or a script failure is ignored.
    pub async fn apply(&self, browser: &dyn BrowserSession) {
        if let Err(e) = browser.execute_script(&self.script, vec![]).await {
            self.diagnostics
                .debug(TAG, format!("Failed to apply player state: {}", e));
        }
    }
}

/// Treatment priority: hidden, then mini, then the page's own layout.
pub fn build_player_script(state: &PlayerState) -> String {
    let muted = state.muted;
    let volume = if state.muted { "0" } else { "1" };
    let hide = state.hidden;
    let mini = !state.hidden && state.mini;
    format!(
        r#"
(function(){{
  var v = document.querySelector('video');
  if (!v) return;
  try {{ v.muted = {muted}; v.volume = {volume}; }} catch(e) {{}}
  try {{
    if ({hide}) {{
      v.style.opacity='0';
      v.style.width='1px';
      v.style.height='1px';
      v.style.position='fixed';
      v.style.bottom='0';
      v.style.right='0';
      v.style.pointerEvents='none';
      v.style.zIndex='';
    }} else if ({mini}) {{
      v.style.opacity='1';
      v.style.width='100px';
      v.style.height='100px';
      v.style.position='fixed';
      v.style.bottom='6px';
      v.style.right='6px';
      v.style.pointerEvents='none';
      v.style.zIndex='999999';
    }} else {{
      v.style.opacity='';
      v.style.width='';
      v.style.height='';
      v.style.position='';
      v.style.bottom='';
      v.style.right='';
      v.style.pointerEvents='';
      v.style.zIndex='';
    }}
  }} catch(e) {{}}
}})();
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::browser_service::testing::FakeBrowser;

    #[test]
    fn test_hidden_overrides_mini() {
        let script = build_player_script(&PlayerState {
            muted: true,
            hidden: true,
            mini: true,
        });
        assert!(script.contains("v.muted = true; v.volume = 0;"));
        assert!(script.contains("if (true)"));
        assert!(script.contains("else if (false)"));
    }

    #[test]
    fn test_unmuted_default_layout() {
        let script = build_player_script(&PlayerState {
            muted: false,
            hidden: false,
            mini: false,
        });
        assert!(script.contains("v.muted = false; v.volume = 1;"));
        assert!(script.contains("if (false)"));
        assert!(script.contains("else if (false)"));
    }

    #[tokio::test]
    async fn test_apply_swallows_script_errors() {
        let browser = FakeBrowser::new();
        browser.state.lock().unwrap().fail_scripts = true;
        let enforcer = PlayerStateEnforcer::new(PlayerState::default(), Diagnostics::default());
        enforcer.apply(&browser).await;
        enforcer.apply(&browser).await;
        assert_eq!(browser.state.lock().unwrap().scripts.len(), 2);
    }
}
