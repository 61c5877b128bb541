//! Screenshot capture with bounded full-page scroll tiling.

use ghostpilot_perception::{ScreenshotData, ScreenshotMode};
use serde_json::{json, Value};
use tracing::debug;

use crate::errors::ControlError;
use crate::model::ScreenshotRequest;
use crate::session::GhostSession;

/// Depth cap applied when the caller passes none.
const DEFAULT_MAX_SCROLL_STEPS: u32 = 8;

impl GhostSession {
    /// Capture the viewport, or scroll-tile a full page. Full-page
    /// capture visits each viewport-sized segment first so lazy content
    /// loads, then captures the covered extent in one shot;
    /// `max_scroll_steps` caps the depth and sets `truncated` when the
    /// page continues below the cap.
    pub async fn capture_screenshot(
        &self,
        request: &ScreenshotRequest,
    ) -> Result<ScreenshotData, ControlError> {
        match request.mode {
            ScreenshotMode::Viewport => self.capture_viewport(request).await,
            ScreenshotMode::FullPage => self.capture_full_page(request).await,
        }
    }

    async fn capture_viewport(
        &self,
        request: &ScreenshotRequest,
    ) -> Result<ScreenshotData, ControlError> {
        let mut params = json!({
            "format": "jpeg",
            "quality": request.quality,
        });
        if let Some(from_surface) = request.from_surface {
            params["fromSurface"] = Value::Bool(from_surface);
        }
        let response = self
            .shared()
            .send("Page.captureScreenshot", params)
            .await?;
        let base64 = screenshot_data(&response)?;

        Ok(ScreenshotData {
            base64,
            mime: "image/jpeg".into(),
            width: self.shared().cfg.viewport_width,
            height: self.shared().cfg.viewport_height,
            mode: ScreenshotMode::Viewport,
            scroll_steps: 0,
            captured_segments: 1,
            truncated: false,
        })
    }

    async fn capture_full_page(
        &self,
        request: &ScreenshotRequest,
    ) -> Result<ScreenshotData, ControlError> {
        let metrics = self
            .shared()
            .send("Page.getLayoutMetrics", json!({}))
            .await?;
        let content_height = metrics
            .get("cssContentSize")
            .or_else(|| metrics.get("contentSize"))
            .and_then(|size| size.get("height"))
            .and_then(Value::as_f64)
            .unwrap_or(f64::from(self.shared().cfg.viewport_height));

        let viewport_height = f64::from(self.shared().cfg.viewport_height);
        let max_steps = request
            .max_scroll_steps
            .unwrap_or(DEFAULT_MAX_SCROLL_STEPS)
            .max(1);
        let steps_needed = (content_height / viewport_height).ceil().max(1.0) as u32;
        let steps = steps_needed.min(max_steps);
        let truncated = steps_needed > max_steps;

        // Walk the page so lazy segments render before the capture.
        for step in 0..steps {
            let offset = f64::from(step) * viewport_height;
            let _ = self
                .evaluate(&format!("window.scrollTo(0, {offset})"), false)
                .await;
            tokio::time::sleep(std::time::Duration::from_millis(120)).await;
        }

        let captured_height = (f64::from(steps) * viewport_height).min(content_height);
        let mut params = json!({
            "format": "jpeg",
            "quality": request.quality,
            "captureBeyondViewport": true,
            "clip": {
                "x": 0,
                "y": 0,
                "width": self.shared().cfg.viewport_width,
                "height": captured_height,
                "scale": 1,
            },
        });
        if let Some(from_surface) = request.from_surface {
            params["fromSurface"] = Value::Bool(from_surface);
        }
        let response = self
            .shared()
            .send("Page.captureScreenshot", params)
            .await?;
        let base64 = screenshot_data(&response)?;

        let _ = self.evaluate("window.scrollTo(0, 0)", false).await;
        debug!(
            target: "ghost-session",
            context = %self.context_id(),
            steps,
            truncated,
            "full-page screenshot captured"
        );

        Ok(ScreenshotData {
            base64,
            mime: "image/jpeg".into(),
            width: self.shared().cfg.viewport_width,
            height: captured_height as u32,
            mode: ScreenshotMode::FullPage,
            scroll_steps: steps,
            captured_segments: steps,
            truncated,
        })
    }
}

fn screenshot_data(response: &Value) -> Result<String, ControlError> {
    response
        .get("data")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ControlError::Protocol("captureScreenshot returned no data".into()))
}
