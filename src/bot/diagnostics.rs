//! Operator-facing startup diagnostics.
//!
//! Printed once after startup: the bot's address, the contact-verification
//! code (as raw text and as a scannable QR block), and the welcome text.
//! Informational only, nothing here affects behavior.

use qrcode::QrCode;
use qrcode::render::unicode;

const BANNER_WIDTH: usize = 40;

/// Renders a section header like `====== Bot Contact Info ======`.
fn section(title: &str) -> String {
    format!("{:=^width$}", format!(" {title} "), width = BANNER_WIDTH)
}

/// Renders a QR payload as a unicode block for terminal scanning.
///
/// Returns `None` when the payload does not fit into a QR code; the raw
/// text is printed either way, so this is best-effort.
fn render_qr(payload: &str) -> Option<String> {
    let code = QrCode::new(payload.as_bytes()).ok()?;
    Some(code.render::<unicode::Dense1x2>().quiet_zone(true).build())
}

/// Prints the contact banner to stdout.
pub fn print_contact_banner(addr: &str, verification_code: &str, welcome_text: &str) {
    println!("{}", section("Bot Contact Info"));
    println!("The address of your bot is: {addr}");
    println!();
    println!("Verify the bot contact by scanning this code with your chat app");
    println!("(required to reach the bot from outside its chatmail instance):");
    println!();
    println!("{verification_code}");
    if let Some(qr) = render_qr(verification_code) {
        println!("\n{qr}");
    }
    println!("{}", section("Welcome Message"));
    println!("{welcome_text}");
    println!("{}", "=".repeat(BANNER_WIDTH));
}
