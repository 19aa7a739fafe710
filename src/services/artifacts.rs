//! Derived access artifacts.
//!
//! Each record carries a QR image of its share URL so the code can be handed
//! over by pointing a camera at a screen. The artifact shares the record's
//! lifetime: it is written at creation, rewritten when the code is renamed,
//! and removed at purge together with the payload.

use qrcode::{QrCode, render::svg};

/// Render a QR image for the given share URL as an SVG document.
pub fn render_qr_svg(url: &str) -> Result<String, qrcode::types::QrError> {
    let code = QrCode::new(url)?;
    Ok(code
        .render::<svg::Color>()
        .min_dimensions(240, 240)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#ffffff"))
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_svg_for_share_url() {
        let svg = render_qr_svg("https://example.com/files/AB12C").unwrap();
        assert!(svg.starts_with("<?xml"));
        assert!(svg.contains("<svg"));
    }
}
