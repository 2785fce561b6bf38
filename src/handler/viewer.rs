use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use serde::Serialize;

use super::immich;
use super::state::ProxyState;
use crate::config::ProxyConfig;

const BUNDLED_TEMPLATE: &str = include_str!("../../templates/index.html");

/// Settings object the viewer script reads from `window.IMMICH_CONFIG`.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ClientSettings {
    pub(crate) interval: u64,
    pub(crate) transition: String,
    pub(crate) image_fit: String,
    pub(crate) album_id: String,
    pub(crate) debug: bool,
}

impl From<&ProxyConfig> for ClientSettings {
    fn from(config: &ProxyConfig) -> Self {
        Self {
            interval: config.slideshow.interval,
            transition: config.slideshow.transition.clone(),
            image_fit: config.slideshow.image_fit.clone(),
            album_id: config.slideshow.album_id.clone(),
            debug: config.debug,
        }
    }
}

/// Inlines the settings into the template. Every `<` is written as its JSON
/// escape so no value can close the surrounding script element.
pub(crate) fn render(template: &str, settings: &ClientSettings) -> Result<String> {
    let safe_settings = serde_json::to_string(settings)?.replace('<', "\\u003c");
    let config_script = format!("<script>window.IMMICH_CONFIG = {safe_settings};</script>");
    Ok(template.replacen(immich::CONFIG_INJECTION_MARKER, &config_script, 1))
}

pub(crate) async fn viewer(State(state): State<ProxyState>) -> Response {
    let template = match &state.config.viewer_template {
        // Read per request so the page can be edited without a restart.
        Some(path) => match tokio::fs::read_to_string(path).await {
            Ok(template) => template,
            Err(error) => {
                tracing::error!(?error, path = %path.display(), "Couldn't read viewer template.");
                return internal_error();
            }
        },
        None => BUNDLED_TEMPLATE.to_string(),
    };

    match render(&template, &ClientSettings::from(state.config.as_ref())) {
        Ok(html) => Html(html).into_response(),
        Err(error) => {
            tracing::error!(?error, "Couldn't render viewer template.");
            internal_error()
        }
    }
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal Server Error: Could not load viewer template",
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(album_id: &str) -> ClientSettings {
        ClientSettings {
            interval: 15,
            transition: "fade".to_string(),
            image_fit: "cover".to_string(),
            album_id: album_id.to_string(),
            debug: false,
        }
    }

    #[test]
    fn injects_settings_with_client_field_names() -> Result<()> {
        let html = render(
            "<head><!-- CONFIG_INJECTION --></head>",
            &settings("a1,b2"),
        )?;
        assert_eq!(
            html,
            r#"<head><script>window.IMMICH_CONFIG = {"interval":15,"transition":"fade","imageFit":"cover","albumId":"a1,b2","debug":false};</script></head>"#
        );
        Ok(())
    }

    #[test]
    fn script_end_tag_in_a_value_is_escaped() -> Result<()> {
        let html = render(
            "<!-- CONFIG_INJECTION -->",
            &settings("</script><script>alert(1)</script>"),
        )?;
        assert_eq!(html.matches("</script>").count(), 1);
        assert!(html.ends_with("};</script>"));
        assert!(html.contains(r"\u003c/script>\u003cscript>alert(1)\u003c/script>"));
        Ok(())
    }

    #[test]
    fn bundled_template_carries_the_marker() {
        assert!(BUNDLED_TEMPLATE.contains(immich::CONFIG_INJECTION_MARKER));
    }

    #[test]
    fn settings_follow_configuration() {
        let mut config = ProxyConfig::default();
        config.slideshow.album_id = "x".to_string();
        config.debug = true;
        let settings = ClientSettings::from(&config);
        assert_eq!(settings.album_id, "x");
        assert_eq!(settings.interval, 15);
        assert!(settings.debug);
    }
}
