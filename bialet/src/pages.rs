//! The fixed HTML error/info pages, all sharing one header/footer chrome so
//! Bialet's built-in responses look uniform regardless of which one fires.

const HEADER: &str =
    "<!DOCTYPE html><body style=\"font:2.3rem system-ui;text-align:center;margin:2em;color:#024\"><h1>";

const FOOTER: &str = "</p><p style=\"font-size:.8em;margin-top:2em\">Powered by 🚲 <b><a href=\"https://bialet.dev\" style=\"color:#007FAD\">Bialet</a></b></p></body>";

fn page(body: &str) -> String {
    format!("{HEADER}{body}{FOOTER}")
}

pub fn welcome() -> String {
    page(
        "👋 Welcome to Bialet</h1><p>You're in! What's next?<p>Check out our <b><a \
         href=\"https://bialet.dev/getting-started.html\" style=\"color:#007FAD\">Getting \
         Started guide</a></b>.",
    )
}

pub fn not_found() -> String {
    page("⚠️ Not found</h1><p>Uh-oh! No route found.")
}

pub fn internal_server_error() -> String {
    page("🚨 Internal Server Error</h1><p>Oops! Something broke.")
}

pub fn forbidden() -> String {
    page("🚫 Forbidden</h1><p>Sorry, you don't have permission to access this page.")
}

/// The built-in default favicon, served when `/favicon.ico` has no
/// corresponding file on disk. A 1x1 transparent ICO is enough to keep
/// browsers quiet without shipping a real asset.
pub const DEFAULT_FAVICON: &[u8] = &[
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x01, 0x00, 0x01, 0x00, 0x01, 0x00, 0x18, 0x00, 0x30,
    0x00, 0x00, 0x00, 0x16, 0x00, 0x00, 0x00, 0x28, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
    0x02, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welcome_contains_literal_greeting() {
        assert!(welcome().contains("Welcome to Bialet"));
    }

    #[test]
    fn forbidden_contains_literal_word() {
        assert!(forbidden().contains("Forbidden"));
    }

    #[test]
    fn all_pages_share_header_and_footer() {
        for p in [welcome(), not_found(), internal_server_error(), forbidden()] {
            assert!(p.starts_with(HEADER));
            assert!(p.ends_with(FOOTER));
        }
    }
}
