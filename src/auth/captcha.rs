// Captcha challenge service
//
// Issues short-lived distorted-text challenges keyed by an opaque challenge
// id (carried in a cookie), and verifies a single response per challenge.
// A challenge is consumed by its first verification attempt, pass or fail:
// a failed guess cannot be retried against the same challenge.

use crate::config::{AuthConfig, CAPTCHA_TTL_SECS};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// An issued, not-yet-consumed challenge
#[derive(Debug, Clone)]
struct IssuedChallenge {
    text: String,
    created_at: DateTime<Utc>,
}

impl IssuedChallenge {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > Duration::seconds(CAPTCHA_TTL_SECS)
    }
}

/// Captcha service: issue/verify challenges bound to a challenge id
#[derive(Clone)]
pub struct CaptchaService {
    length: usize,
    charset: Vec<char>,
    challenges: Arc<RwLock<HashMap<Uuid, IssuedChallenge>>>,
}

impl CaptchaService {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            length: config.captcha_length,
            charset: config.captcha_charset.chars().collect(),
            challenges: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Issue a new challenge: returns the challenge id and the rendered SVG.
    /// Expired entries are pruned here so abandoned challenges do not pile up.
    pub async fn issue(&self) -> (Uuid, String) {
        let text = self.random_text();
        let svg = render_svg(&text);
        let id = Uuid::new_v4();
        let now = Utc::now();

        let mut challenges = self.challenges.write().await;
        challenges.retain(|_, challenge| !challenge.is_expired(now));
        challenges.insert(
            id,
            IssuedChallenge {
                text,
                created_at: now,
            },
        );

        tracing::debug!(challenge_id = %id, "Issued captcha challenge");
        (id, svg)
    }

    /// Verify a response against the challenge for `challenge_id`.
    /// The challenge is removed before comparing, so it cannot be reused.
    /// Returns false when no challenge exists, it expired, or the text
    /// does not match (case-insensitively).
    pub async fn verify(&self, challenge_id: Uuid, response: &str) -> bool {
        let challenge = {
            let mut challenges = self.challenges.write().await;
            challenges.remove(&challenge_id)
        };

        let Some(challenge) = challenge else {
            tracing::debug!(challenge_id = %challenge_id, "No captcha challenge for id");
            return false;
        };

        if challenge.is_expired(Utc::now()) {
            tracing::debug!(challenge_id = %challenge_id, "Captcha challenge expired");
            return false;
        }

        challenge.text.eq_ignore_ascii_case(response.trim())
    }

    fn random_text(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..self.length)
            .map(|_| self.charset[rng.gen_range(0..self.charset.len())])
            .collect()
    }

    /// Insert a challenge with known text, bypassing rendering.
    /// Lets service and flow tests answer the captcha deterministically.
    #[cfg(test)]
    pub(crate) async fn issue_known(&self, text: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.challenges.write().await.insert(
            id,
            IssuedChallenge {
                text: text.to_string(),
                created_at: Utc::now(),
            },
        );
        id
    }

    /// Number of live challenges; used by tests
    #[cfg(test)]
    async fn pending(&self) -> usize {
        self.challenges.read().await.len()
    }
}

/// Render challenge text as a distorted SVG image: per-glyph rotation and
/// vertical jitter plus a couple of strike-through noise lines.
fn render_svg(text: &str) -> String {
    let mut rng = rand::thread_rng();
    let width = 30 * text.len().max(1) + 20;
    let height = 40;

    let mut body = String::new();
    for (i, ch) in text.chars().enumerate() {
        let x = 15 + i * 28;
        let y = 27 + rng.gen_range(-4..=4);
        let angle = rng.gen_range(-20..=20);
        body.push_str(&format!(
            r##"<text x="{x}" y="{y}" transform="rotate({angle} {x} {y})" font-family="monospace" font-size="26" fill="#333">{ch}</text>"##
        ));
    }
    for _ in 0..2 {
        let y1 = rng.gen_range(5..height - 5);
        let y2 = rng.gen_range(5..height - 5);
        body.push_str(&format!(
            r##"<line x1="0" y1="{y1}" x2="{width}" y2="{y2}" stroke="#999" stroke-width="1"/>"##
        ));
    }

    format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}"><rect width="100%" height="100%" fill="#f4f4f4"/>{body}</svg>"##
    )
}
