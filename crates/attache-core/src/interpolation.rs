//! Path and URL templates.
//!
//! A template such as
//! `:rails_root/public/system/:class/:attachment/:id_partition/:style/:filename`
//! is compiled once into literal and token segments. Each known token maps to
//! a plain function of an [`InterpolationContext`]; unknown tokens stay in the
//! output verbatim.

use std::fmt;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static TOKEN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":\w+").expect("valid interpolation token pattern"));

/// Values a template can draw from.
#[derive(Debug, Clone, Copy)]
pub struct InterpolationContext<'a> {
    pub record_type: &'a str,
    pub attachment: &'a str,
    pub id: i64,
    pub style: &'a str,
    pub file_name: Option<&'a str>,
    /// Output format of the style; overrides the original extension.
    pub style_format: Option<&'a str>,
    pub updated_at: Option<DateTime<Utc>>,
    pub root: &'a str,
    pub env: &'a str,
    /// Template substituted for `:url`.
    pub url_template: Option<&'a Template>,
}

type TokenFn = fn(&InterpolationContext<'_>) -> String;

#[derive(Clone)]
enum Segment {
    Literal(String),
    Token(TokenFn),
}

/// Compiled path or URL template.
#[derive(Clone)]
pub struct Template {
    pattern: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn compile(pattern: &str) -> Self {
        let mut segments = Vec::new();
        let mut last = 0;

        for m in TOKEN_PATTERN.find_iter(pattern) {
            if let Some(token) = lookup(&m.as_str()[1..]) {
                if m.start() > last {
                    segments.push(Segment::Literal(pattern[last..m.start()].to_string()));
                }
                segments.push(Segment::Token(token));
                last = m.end();
            }
        }
        if last < pattern.len() {
            segments.push(Segment::Literal(pattern[last..].to_string()));
        }

        Self {
            pattern: pattern.to_string(),
            segments,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn render(&self, ctx: &InterpolationContext<'_>) -> String {
        let mut out = String::with_capacity(self.pattern.len() + 32);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Token(token) => out.push_str(&token(ctx)),
            }
        }
        out
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Template").field(&self.pattern).finish()
    }
}

fn lookup(name: &str) -> Option<TokenFn> {
    let token: TokenFn = match name {
        "filename" => filename,
        "basename" => basename,
        "extension" => extension,
        "id" => id,
        "id_partition" => id_partition,
        "class" => class,
        "attachment" => attachment,
        "style" => style,
        "timestamp" => timestamp,
        "rails_root" | "root" => root,
        "rails_env" | "env" => env,
        "url" => url,
        _ => return None,
    };
    Some(token)
}

fn filename(ctx: &InterpolationContext<'_>) -> String {
    let ext = extension(ctx);
    if ext.is_empty() {
        basename(ctx)
    } else {
        format!("{}.{}", basename(ctx), ext)
    }
}

fn basename(ctx: &InterpolationContext<'_>) -> String {
    let name = ctx.file_name.unwrap_or("");
    match name.rfind('.') {
        Some(dot) if dot > 0 => name[..dot].to_string(),
        _ => name.to_string(),
    }
}

fn extension(ctx: &InterpolationContext<'_>) -> String {
    if let Some(format) = ctx.style_format.filter(|f| !f.is_empty()) {
        return format.to_string();
    }
    let name = ctx.file_name.unwrap_or("");
    match name.rfind('.') {
        Some(dot) if dot > 0 => name[dot + 1..].to_string(),
        _ => String::new(),
    }
}

fn id(ctx: &InterpolationContext<'_>) -> String {
    ctx.id.to_string()
}

fn id_partition(ctx: &InterpolationContext<'_>) -> String {
    let digits = format!("{:09}", ctx.id);
    digits
        .as_bytes()
        .chunks(3)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn class(ctx: &InterpolationContext<'_>) -> String {
    pluralize(&underscore(ctx.record_type))
}

fn attachment(ctx: &InterpolationContext<'_>) -> String {
    pluralize(ctx.attachment)
}

fn style(ctx: &InterpolationContext<'_>) -> String {
    ctx.style.to_string()
}

fn timestamp(ctx: &InterpolationContext<'_>) -> String {
    ctx.updated_at.map(|t| t.to_string()).unwrap_or_default()
}

fn root(ctx: &InterpolationContext<'_>) -> String {
    ctx.root.to_string()
}

fn env(ctx: &InterpolationContext<'_>) -> String {
    ctx.env.to_string()
}

fn url(ctx: &InterpolationContext<'_>) -> String {
    match ctx.url_template {
        Some(template) => {
            let inner = InterpolationContext {
                url_template: None,
                ..*ctx
            };
            template.render(&inner)
        }
        None => String::new(),
    }
}

/// `UserProfile` -> `user_profile`, `Admin::Image` -> `admin/image`.
pub fn underscore(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let chars: Vec<char> = name.replace("::", "/").chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1).copied();
            let boundary = match prev {
                Some(p) if p.is_ascii_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_ascii_uppercase() => next.is_some_and(|n| n.is_ascii_lowercase()),
                _ => false,
            };
            if boundary {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// English plural for identifiers: `image` -> `images`, `gallery` -> `galleries`.
pub fn pluralize(word: &str) -> String {
    if word.is_empty() {
        return String::new();
    }
    let lower = word.to_ascii_lowercase();
    if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey")
        && !lower.ends_with("oy") && !lower.ends_with("uy")
    {
        format!("{}ies", &word[..word.len() - 1])
    } else if ["s", "x", "z", "ch", "sh"].iter().any(|s| lower.ends_with(s)) {
        format!("{}es", word)
    } else {
        format!("{}s", word)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ctx<'a>() -> InterpolationContext<'a> {
        InterpolationContext {
            record_type: "UserProfile",
            attachment: "avatar",
            id: 1234,
            style: "thumb",
            file_name: Some("portrait.jpeg"),
            style_format: None,
            updated_at: None,
            root: "/srv/app",
            env: "production",
            url_template: None,
        }
    }

    #[test]
    fn test_default_path_template() {
        let template =
            Template::compile(":rails_root/public/system/:class/:attachment/:id_partition/:style/:filename");
        assert_eq!(
            template.render(&ctx()),
            "/srv/app/public/system/user_profiles/avatars/000/001/234/thumb/portrait.jpeg"
        );
    }

    #[test]
    fn test_style_format_overrides_extension() {
        let mut c = ctx();
        c.style_format = Some("png");
        let template = Template::compile(":basename.:extension|:filename");
        assert_eq!(template.render(&c), "portrait.png|portrait.png");
    }

    #[test]
    fn test_unknown_tokens_are_kept() {
        let template = Template::compile("http://cdn.example.com:8080/:nope/:id");
        assert_eq!(template.render(&ctx()), "http://cdn.example.com:8080/:nope/1234");
    }

    #[test]
    fn test_url_token_renders_url_template() {
        let url = Template::compile("/system/:class/:id/:style/:filename");
        let path = Template::compile(":root/public:url");
        let mut c = ctx();
        c.url_template = Some(&url);
        assert_eq!(
            path.render(&c),
            "/srv/app/public/system/user_profiles/1234/thumb/portrait.jpeg"
        );
    }

    #[test]
    fn test_url_token_does_not_recurse() {
        let url = Template::compile("/a:url");
        let mut c = ctx();
        c.url_template = Some(&url);
        assert_eq!(url.render(&c), "/a/a");
    }

    #[test]
    fn test_timestamp_and_env() {
        let mut c = ctx();
        c.updated_at = Some(Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap());
        let template = Template::compile(":env-:timestamp");
        assert_eq!(template.render(&c), "production-2024-03-05 10:00:00 UTC");
    }

    #[test]
    fn test_filename_without_extension() {
        let mut c = ctx();
        c.file_name = Some("README");
        assert_eq!(Template::compile(":filename").render(&c), "README");
    }

    #[test]
    fn test_id_partition_small_and_large() {
        let mut c = ctx();
        c.id = 5;
        assert_eq!(Template::compile(":id_partition").render(&c), "000/000/005");
        c.id = 123_456_789;
        assert_eq!(Template::compile(":id_partition").render(&c), "123/456/789");
    }

    #[test]
    fn test_underscore() {
        assert_eq!(underscore("Image"), "image");
        assert_eq!(underscore("UserProfile"), "user_profile");
        assert_eq!(underscore("Admin::HTMLPage"), "admin/html_page");
    }

    #[test]
    fn test_pluralize() {
        assert_eq!(pluralize("image"), "images");
        assert_eq!(pluralize("gallery"), "galleries");
        assert_eq!(pluralize("day"), "days");
        assert_eq!(pluralize("box"), "boxes");
        assert_eq!(pluralize("photo"), "photos");
    }
}
