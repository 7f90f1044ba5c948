//! Email rendering for a brief: plain text + escaped HTML, with a per-subscriber
//! unsubscribe link.

use std::fmt::Write as _;

use html_escape::{encode_double_quoted_attribute, encode_text};
use sha2::{Digest, Sha256};

use super::email::OutgoingEmail;
use crate::config::DispatchConfig;
use crate::model::{ContentOrigin, DailyBrief};

/// 32 hex chars of SHA-256(secret ":" id).
pub fn unsubscribe_token(secret: &str, subscriber_id: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b":");
    hasher.update(subscriber_id.to_string().as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for b in digest.iter().take(16) {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Always `false` without a secret: an unkeyed token is forgeable.
pub fn verify_unsubscribe_token(secret: &str, subscriber_id: u64, token: &str) -> bool {
    if secret.trim().is_empty() {
        return false;
    }
    let expected = unsubscribe_token(secret, subscriber_id);
    // Length is fixed; compare every byte regardless of where a mismatch occurs.
    expected.len() == token.len()
        && expected
            .bytes()
            .zip(token.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

pub fn subject_for(brief: &DailyBrief) -> String {
    format!("Daily Brief: {}", brief.date.format("%A, %B %-d"))
}

/// Render `brief` for `to`. `subscriber_id` is `None` for test sends (no unsubscribe link).
pub fn render_email(
    brief: &DailyBrief,
    to: &str,
    subscriber_id: Option<u64>,
    cfg: &DispatchConfig,
) -> OutgoingEmail {
    let base = cfg.base_url.trim_end_matches('/');
    let brief_url = format!("{base}/brief/{}", brief.date);
    let unsubscribe_url = subscriber_id.map(|id| {
        format!(
            "{base}/brief/unsubscribe?sid={id}&token={}",
            unsubscribe_token(&cfg.unsubscribe_secret, id)
        )
    });

    let mut text = String::new();
    let mut html = String::new();

    let _ = writeln!(text, "{}\n", subject_for(brief));
    let _ = write!(
        html,
        "<html><body><h1>{}</h1>",
        encode_text(&subject_for(brief))
    );

    for item in &brief.items {
        let _ = writeln!(text, "{}. {}", item.position, item.headline);
        for b in &item.bullets {
            let _ = writeln!(text, "   - {b}");
        }
        let _ = writeln!(text, "   Coverage: {}", item.coverage.note);
        for link in &item.verification_links {
            let _ = writeln!(text, "   Source: {link}");
        }
        if item.origin == ContentOrigin::Fallback {
            let _ = writeln!(text, "   (Summary compiled from source excerpts.)");
        }
        text.push('\n');

        let _ = write!(html, "<h2>{}</h2><ul>", encode_text(&item.headline));
        for b in &item.bullets {
            let _ = write!(html, "<li>{}</li>", encode_text(b));
        }
        let _ = write!(
            html,
            "</ul><p><em>{}</em> (left {}, center {}, right {})</p>",
            encode_text(&item.coverage.note),
            item.coverage.left_count,
            item.coverage.center_count,
            item.coverage.right_count
        );
        if !item.verification_links.is_empty() {
            html.push_str("<p>Verify: ");
            for (i, link) in item.verification_links.iter().enumerate() {
                if i > 0 {
                    html.push_str(" | ");
                }
                let _ = write!(
                    html,
                    "<a href=\"{}\">{}</a>",
                    encode_double_quoted_attribute(link),
                    i + 1
                );
            }
            html.push_str("</p>");
        }
    }

    let _ = writeln!(text, "Read online: {brief_url}");
    let _ = write!(
        html,
        "<p><a href=\"{}\">Read online</a></p>",
        encode_double_quoted_attribute(&brief_url)
    );
    if let Some(url) = &unsubscribe_url {
        let _ = writeln!(text, "Unsubscribe: {url}");
        let _ = write!(
            html,
            "<p><a href=\"{}\">Unsubscribe</a></p>",
            encode_double_quoted_attribute(url)
        );
    }
    html.push_str("</body></html>");

    OutgoingEmail {
        to: to.to_string(),
        subject: subject_for(brief),
        text,
        html,
    }
}
