use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::CaptureError;

pub const FALLBACK_FILENAME: &str = "hilite-export";
const FILENAME_MAX_CHARS: usize = 50;

pub const PAGE_WIDTH_MM: f64 = 210.0;
pub const PAGE_HEIGHT_MM: f64 = 295.0;

/// Time given to the host to settle after scrolling to the top.
const SETTLE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImageFormat {
    Png,
    Jpeg { quality: f32 },
}

impl Quality {
    pub fn image_format(self) -> ImageFormat {
        match self {
            Quality::High => ImageFormat::Png,
            Quality::Medium => ImageFormat::Jpeg { quality: 0.75 },
            Quality::Low => ImageFormat::Jpeg { quality: 0.5 },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Png,
    Pdf(Quality),
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
            ExportFormat::Pdf(_) => "pdf",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            ExportFormat::Png => "image/png",
            ExportFormat::Pdf(_) => "application/pdf",
        }
    }
}

/// Scroll position and body overflow of the host view.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Viewport {
    pub scroll_x: f64,
    pub scroll_y: f64,
    pub overflow: Option<String>,
}

/// What gets handed to the renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct PageSnapshot {
    pub url: String,
    pub title: Option<String>,
    pub markup: String,
}

/// A rendered page image, PNG encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
    pub png: Vec<u8>,
}

pub trait PageCapture: Send + Sync {
    fn viewport(&self) -> Viewport;

    fn set_viewport(&self, viewport: &Viewport);

    fn capture<'a>(&'a self, page: &'a PageSnapshot) -> BoxFuture<'a, Result<Canvas, CaptureError>>;
}

/// Where one PDF page shows the page image, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PagePlacement {
    pub y_offset: f64,
    pub width: f64,
    pub height: f64,
}

pub trait PdfAssembler: Send + Sync {
    fn assemble<'a>(
        &'a self,
        canvas: &'a Canvas,
        format: ImageFormat,
        pages: &'a [PagePlacement],
    ) -> BoxFuture<'a, Result<Vec<u8>, CaptureError>>;
}

/// Slices a canvas into A4 portrait pages. The image is scaled to the page
/// width and shifted up by one page height per additional page.
pub fn paginate(width: u32, height: u32) -> Vec<PagePlacement> {
    if width == 0 {
        return Vec::new();
    }
    let image_height = f64::from(height) * PAGE_WIDTH_MM / f64::from(width);
    let place = |y_offset| PagePlacement {
        y_offset,
        width: PAGE_WIDTH_MM,
        height: image_height,
    };

    let mut pages = vec![place(0.0)];
    let mut height_left = image_height - PAGE_HEIGHT_MM;
    while height_left > 0.0 {
        pages.push(place(height_left - image_height));
        height_left -= PAGE_HEIGHT_MM;
    }
    pages
}

/// `<title>-<YYYY-MM-DD>.<ext>`, with the title sanitized for file systems.
pub fn export_filename(title: Option<&str>, extension: &str, date: NaiveDate) -> String {
    let title = title.filter(|t| !t.is_empty()).unwrap_or(FALLBACK_FILENAME);

    let mut sanitized = String::with_capacity(title.len());
    let mut in_space = false;
    for c in title.chars() {
        if c.is_whitespace() {
            if !in_space {
                sanitized.push('-');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        let allowed = c.is_ascii_alphanumeric() || c == '-' || ('\u{00C0}'..='\u{017F}').contains(&c);
        sanitized.push(if allowed { c } else { '_' });
    }
    let name: String = sanitized.to_lowercase().chars().take(FILENAME_MAX_CHARS).collect();

    format!("{}-{}.{}", name, date.format("%Y-%m-%d"), extension)
}

/// Finished export ready for download.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportArtifact {
    pub filename: String,
    pub mime: &'static str,
    pub bytes: Vec<u8>,
}

/// Puts the viewport back however the export ends.
struct ViewportGuard {
    capture: Arc<dyn PageCapture>,
    saved: Viewport,
}

impl ViewportGuard {
    fn prepare(capture: Arc<dyn PageCapture>) -> Self {
        let saved = capture.viewport();
        capture.set_viewport(&Viewport {
            scroll_x: 0.0,
            scroll_y: 0.0,
            overflow: Some("visible".to_string()),
        });
        ViewportGuard { capture, saved }
    }
}

impl Drop for ViewportGuard {
    fn drop(&mut self) {
        self.capture.set_viewport(&self.saved);
    }
}

#[derive(Clone)]
pub struct Exporter {
    capture: Option<Arc<dyn PageCapture>>,
    pdf: Option<Arc<dyn PdfAssembler>>,
    timeout: Duration,
    blocked_schemes: Vec<String>,
}

impl Exporter {
    pub fn new(timeout: Duration, blocked_schemes: Vec<String>) -> Self {
        Exporter {
            capture: None,
            pdf: None,
            timeout,
            blocked_schemes,
        }
    }

    pub fn from_config(cfg: &crate::config::Export) -> Self {
        Self::new(
            Duration::from_secs(cfg.capture_timeout_seconds),
            cfg.blocked_schemes.clone(),
        )
    }

    pub fn with_capture(mut self, capture: Arc<dyn PageCapture>) -> Self {
        self.capture = Some(capture);
        self
    }

    pub fn with_pdf(mut self, pdf: Arc<dyn PdfAssembler>) -> Self {
        self.pdf = Some(pdf);
        self
    }

    fn check_scheme(&self, url: &str) -> Result<(), CaptureError> {
        let scheme = url.split(':').next().unwrap_or_default().to_ascii_lowercase();
        match self
            .blocked_schemes
            .iter()
            .find(|prefix| scheme.starts_with(&prefix.to_ascii_lowercase()))
        {
            Some(prefix) => Err(CaptureError::RestrictedPage(capitalize(prefix))),
            None => Ok(()),
        }
    }

    pub async fn export(
        &self,
        page: &PageSnapshot,
        format: ExportFormat,
        date: NaiveDate,
    ) -> Result<ExportArtifact, CaptureError> {
        let capture = self
            .capture
            .clone()
            .ok_or(CaptureError::RendererMissing("Page capture"))?;
        let _guard = ViewportGuard::prepare(capture.clone());
        tokio::time::sleep(SETTLE_DELAY).await;

        self.check_scheme(&page.url)?;
        let canvas = tokio::time::timeout(self.timeout, capture.capture(page))
            .await
            .map_err(|_| CaptureError::Timeout)??;

        let bytes = match format {
            ExportFormat::Png => canvas.png,
            ExportFormat::Pdf(quality) => {
                let pdf = self.pdf.as_ref().ok_or(CaptureError::RendererMissing("PDF"))?;
                let pages = paginate(canvas.width, canvas.height);
                if pages.is_empty() {
                    return Err(CaptureError::Render("captured page is empty".to_string()));
                }
                pdf.assemble(&canvas, quality.image_format(), &pages).await?
            }
        };

        tracing::info!(url = %page.url, format = format.extension(), bytes = bytes.len(), "exported page");
        Ok(ExportArtifact {
            filename: export_filename(page.title.as_deref(), format.extension(), date),
            mime: format.mime(),
            bytes,
        })
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::sync::Mutex;

    struct FakeCapture {
        viewport: Mutex<Viewport>,
        seen: Mutex<Vec<Viewport>>,
        delay: Duration,
    }

    impl FakeCapture {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(FakeCapture {
                viewport: Mutex::new(Viewport {
                    scroll_x: 3.0,
                    scroll_y: 480.0,
                    overflow: Some("hidden".to_string()),
                }),
                seen: Mutex::new(Vec::new()),
                delay,
            })
        }
    }

    impl PageCapture for FakeCapture {
        fn viewport(&self) -> Viewport {
            self.viewport.lock().unwrap().clone()
        }

        fn set_viewport(&self, viewport: &Viewport) {
            self.seen.lock().unwrap().push(viewport.clone());
            *self.viewport.lock().unwrap() = viewport.clone();
        }

        fn capture<'a>(&'a self, _page: &'a PageSnapshot) -> BoxFuture<'a, Result<Canvas, CaptureError>> {
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                Ok(Canvas {
                    width: 1000,
                    height: 3000,
                    png: vec![0x89, b'P', b'N', b'G'],
                })
            })
        }
    }

    struct FakePdf;

    impl PdfAssembler for FakePdf {
        fn assemble<'a>(
            &'a self,
            _canvas: &'a Canvas,
            format: ImageFormat,
            pages: &'a [PagePlacement],
        ) -> BoxFuture<'a, Result<Vec<u8>, CaptureError>> {
            Box::pin(async move { Ok(format!("{:?}:{}", format, pages.len()).into_bytes()) })
        }
    }

    fn page(url: &str) -> PageSnapshot {
        PageSnapshot {
            url: url.to_string(),
            title: Some("Reading Notes".to_string()),
            markup: "<body/>".to_string(),
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 9).unwrap()
    }

    #[rstest]
    #[case(1000, 1000, vec![0.0])]
    #[case(1000, 1404, vec![0.0])]
    #[case(1000, 3000, vec![0.0, -295.0, -590.0])]
    #[case(500, 2000, vec![0.0, -295.0, -590.0])]
    fn test_paginate(#[case] width: u32, #[case] height: u32, #[case] offsets: Vec<f64>) {
        let pages = paginate(width, height);
        let got: Vec<f64> = pages.iter().map(|p| p.y_offset.round()).collect();
        assert_eq!(got, offsets);
        assert!(pages.iter().all(|p| p.width == PAGE_WIDTH_MM));
    }

    #[rstest]
    #[case(Some("Reading Notes"), "reading-notes-2026-03-09.pdf")]
    #[case(Some("Café:  Über/Alles"), "café_-über_alles-2026-03-09.pdf")]
    #[case(Some(""), "hilite-export-2026-03-09.pdf")]
    #[case(None, "hilite-export-2026-03-09.pdf")]
    #[case(Some("a very long title that keeps going well past the fifty character limit"), "a-very-long-title-that-keeps-going-well-past-the-f-2026-03-09.pdf")]
    fn test_export_filename(#[case] title: Option<&str>, #[case] expected: &str) {
        assert_eq!(export_filename(title, "pdf", date()), expected);
    }

    #[rstest]
    #[case(Quality::High, ImageFormat::Png)]
    #[case(Quality::Medium, ImageFormat::Jpeg { quality: 0.75 })]
    #[case(Quality::Low, ImageFormat::Jpeg { quality: 0.5 })]
    fn test_quality_levels(#[case] quality: Quality, #[case] expected: ImageFormat) {
        assert_eq!(quality.image_format(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pdf_export_restores_viewport() {
        let capture = FakeCapture::new(Duration::from_millis(10));
        let exporter = Exporter::new(Duration::from_secs(12), vec!["chrome".to_string()])
            .with_capture(capture.clone())
            .with_pdf(Arc::new(FakePdf));

        let artifact = exporter
            .export(&page("https://a.test/"), ExportFormat::Pdf(Quality::Low), date())
            .await
            .unwrap();

        assert_eq!(artifact.filename, "reading-notes-2026-03-09.pdf");
        assert_eq!(artifact.mime, "application/pdf");
        assert_eq!(artifact.bytes, b"Jpeg { quality: 0.5 }:3".to_vec());
        let seen = capture.seen.lock().unwrap();
        assert_eq!(seen[0].overflow.as_deref(), Some("visible"));
        assert_eq!(seen[1].scroll_y, 480.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restricted_page_is_refused() {
        let capture = FakeCapture::new(Duration::ZERO);
        let exporter = Exporter::new(Duration::from_secs(12), vec!["chrome".to_string()])
            .with_capture(capture.clone());

        let err = exporter
            .export(&page("chrome-extension://abc/page.html"), ExportFormat::Png, date())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Cannot export Chrome system pages.");
        assert_eq!(capture.viewport().scroll_y, 480.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_capture_times_out_and_restores_viewport() {
        let capture = FakeCapture::new(Duration::from_secs(60));
        let exporter =
            Exporter::new(Duration::from_secs(12), Vec::new()).with_capture(capture.clone());

        let err = exporter
            .export(&page("https://a.test/"), ExportFormat::Png, date())
            .await
            .unwrap_err();

        assert!(matches!(err, CaptureError::Timeout));
        assert_eq!(capture.viewport().overflow.as_deref(), Some("hidden"));
    }

    #[tokio::test]
    async fn test_missing_renderers() {
        let exporter = Exporter::new(Duration::from_secs(12), Vec::new());
        let err = exporter
            .export(&page("https://a.test/"), ExportFormat::Png, date())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Page capture library not loaded.");

        let exporter = exporter.with_capture(FakeCapture::new(Duration::ZERO));
        let err = exporter
            .export(&page("https://a.test/"), ExportFormat::Pdf(Quality::High), date())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "PDF library not loaded.");
    }
}
