use anyhow::Context as _;
use axum::response::Html;
use tera::{Context, Tera};

use crate::error::AppError;

pub const HOME: &str = "home.html";
pub const SIGNUP: &str = "accounts/signup.html";
pub const LOGIN: &str = "accounts/login.html";
pub const USER_PROFILE: &str = "accounts/user_profile.html";

/// Builds the engine from the templates compiled into the binary.
pub fn load() -> anyhow::Result<Tera> {
    let mut tera = Tera::default();
    tera.add_raw_templates(vec![
        ("base.html", include_str!("../templates/base.html")),
        (HOME, include_str!("../templates/home.html")),
        (SIGNUP, include_str!("../templates/accounts/signup.html")),
        (LOGIN, include_str!("../templates/accounts/login.html")),
        (USER_PROFILE, include_str!("../templates/accounts/user_profile.html")),
    ])
    .context("register page templates")?;
    Ok(tera)
}

pub fn render(tera: &Tera, name: &str, ctx: &Context) -> Result<Html<String>, AppError> {
    Ok(Html(tera.render(name, ctx)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_templates_parse() {
        let tera = load().expect("templates should parse");
        let names: Vec<&str> = tera.get_template_names().collect();
        for expected in [HOME, SIGNUP, LOGIN, USER_PROFILE] {
            assert!(names.contains(&expected), "missing {expected}");
        }
    }

    #[test]
    fn profile_escapes_path_value() {
        let tera = load().unwrap();
        let mut ctx = Context::new();
        ctx.insert("username", "<script>");
        ctx.insert("user", &serde_json::json!({ "username": "alice" }));
        let html = render(&tera, USER_PROFILE, &ctx).unwrap().0;
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
    }
}
