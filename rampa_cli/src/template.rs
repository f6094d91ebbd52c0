//! URL templates with per-iteration random placeholders.
//!
//! `http://localhost:8080/api/stocks/{rand:1..100}` renders a fresh integer in
//! `[1, 100)` every time; `{rand:1..=100}` includes the upper bound.
use std::{fmt, str::FromStr};

use anyhow::{Context, bail};
use rand::Rng;

const PLACEHOLDER: &str = "{rand:";

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// Inclusive bounds.
    Rand { lo: i64, hi: i64 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UrlTemplate {
    segments: Vec<Segment>,
}

impl UrlTemplate {
    /// True when rendering always yields the same URL.
    pub fn is_static(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    pub fn render(&self, rng: &mut impl Rng) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Rand { lo, hi } => out.push_str(&rng.random_range(*lo..=*hi).to_string()),
            }
        }
        out
    }
}

fn parse_range(range: &str) -> anyhow::Result<Segment> {
    let (lo, hi, inclusive) = if let Some((lo, hi)) = range.split_once("..=") {
        (lo, hi, true)
    } else if let Some((lo, hi)) = range.split_once("..") {
        (lo, hi, false)
    } else {
        bail!("expected LO..HI or LO..=HI, got {range:?}");
    };
    let lo: i64 = lo.trim().parse().with_context(|| format!("bad lower bound in {range:?}"))?;
    let hi: i64 = hi.trim().parse().with_context(|| format!("bad upper bound in {range:?}"))?;
    let hi = if inclusive {
        hi
    } else {
        hi.checked_sub(1).with_context(|| format!("empty range {range:?}"))?
    };
    if hi < lo {
        bail!("empty range {range:?}");
    }
    Ok(Segment::Rand { lo, hi })
}

impl FromStr for UrlTemplate {
    type Err = anyhow::Error;

    fn from_str(input: &str) -> anyhow::Result<Self> {
        let mut segments = Vec::new();
        let mut rest = input;
        while let Some(start) = rest.find(PLACEHOLDER) {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_owned()));
            }
            let after = &rest[start + PLACEHOLDER.len()..];
            let Some(end) = after.find('}') else {
                bail!("unterminated placeholder in {input:?}");
            };
            segments.push(parse_range(&after[..end])?);
            rest = &after[end + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_owned()));
        }
        Ok(Self { segments })
    }
}

impl fmt::Display for UrlTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => f.write_str(text)?,
                Segment::Rand { lo, hi } => write!(f, "{{rand:{lo}..={hi}}}")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn plain_urls_render_unchanged() {
        let template: UrlTemplate = "http://localhost:8080/api/stocks".parse().unwrap();
        assert!(template.is_static());
        assert_eq!(
            template.render(&mut StdRng::seed_from_u64(1)),
            "http://localhost:8080/api/stocks"
        );
    }

    #[test]
    fn exclusive_range_stays_below_the_upper_bound() {
        let template: UrlTemplate = "http://h/api/stocks/{rand:1..4}".parse().unwrap();
        assert!(!template.is_static());
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let url = template.render(&mut rng);
            let id: i64 = url.rsplit('/').next().unwrap().parse().unwrap();
            assert!((1..4).contains(&id), "{url}");
        }
    }

    #[test]
    fn inclusive_range_reaches_the_upper_bound() {
        let template: UrlTemplate = "/{rand:5..=6}?page={rand:0..=0}".parse().unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let rendered: Vec<String> = (0..100).map(|_| template.render(&mut rng)).collect();
        assert!(rendered.iter().any(|u| u == "/6?page=0"));
        assert!(rendered.iter().all(|u| u == "/5?page=0" || u == "/6?page=0"));
    }

    #[test]
    fn malformed_placeholders_are_rejected() {
        assert!("/{rand:1..10".parse::<UrlTemplate>().is_err());
        assert!("/{rand:10..10}".parse::<UrlTemplate>().is_err());
        assert!("/{rand:a..b}".parse::<UrlTemplate>().is_err());
        assert!("/{rand:5}".parse::<UrlTemplate>().is_err());
    }

    #[test]
    fn display_normalizes_ranges() {
        let template: UrlTemplate = "/x/{rand:1..100}".parse().unwrap();
        assert_eq!(template.to_string(), "/x/{rand:1..=99}");
    }
}
