// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Integration tests for the render and check commands.
//!
//! These tests build a project in a temp directory and drive the commands
//! through the crate's public functions.

use std::fs;
use std::path::Path;

use serde_json::json;
use tagsmith::Data;
use tagsmith_cli::commands::check::check_templates;
use tagsmith_cli::commands::render::{load_data, render_template};
use tagsmith_cli::config::Config;
use tempfile::tempdir;

/// Create a test project structure in a temp directory
fn setup_test_project(dir: &Path) {
    fs::create_dir_all(dir.join("views/partials")).unwrap();
    fs::write(
        dir.join("tagsmith.toml"),
        "[templates]\ndir = \"views\"\nextension = \"tpl\"\n",
    )
    .unwrap();

    let index = r#"<html>
<body>
{{include "partials/nav", site}}
<main>
{{each posts as post}}<article>{{= post.title | upper}}</article>{{/each}}
</main>
</body>
</html>"#;
    fs::write(dir.join("views/index.tpl"), index).unwrap();
    fs::write(dir.join("views/partials/nav.tpl"), "<nav>{{= name}}</nav>").unwrap();
}

#[tokio::test]
async fn test_render_resolves_includes() {
    let dir = tempdir().unwrap();
    setup_test_project(dir.path());
    let config = Config::load_from(dir.path()).unwrap();

    let data = Data::from(json!({
        "site": { "name": "Blog" },
        "posts": [{ "title": "first" }, { "title": "second" }],
    }));
    let html = render_template(&config, dir.path(), "index", &data).await.unwrap();

    assert!(html.contains("<nav>Blog</nav>"));
    assert!(html.contains("<article>FIRST</article><article>SECOND</article>"));
}

#[tokio::test]
async fn test_render_fails_on_missing_template() {
    let dir = tempdir().unwrap();
    setup_test_project(dir.path());
    let config = Config::load_from(dir.path()).unwrap();

    let result = render_template(&config, dir.path(), "nope", &Data::Null).await;
    assert!(result.is_err());
}

#[test]
fn test_check_reports_broken_templates() {
    let dir = tempdir().unwrap();
    setup_test_project(dir.path());
    fs::write(dir.path().join("views/broken.tpl"), "ok\n{{frobnicate}}\n").unwrap();
    fs::write(dir.path().join("views/unclosed.tpl"), "{{if a}}never closed").unwrap();
    let config = Config::load_from(dir.path()).unwrap();

    let report = check_templates(&config, dir.path()).unwrap();
    assert_eq!(report.checked, 4);
    assert!(!report.is_ok());

    let names: Vec<&str> = report.failures.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["broken", "unclosed"]);

    let (_, errors) = &report.failures[0];
    assert_eq!(errors[0].kind(), "syntax");
    assert_eq!(errors[0].line(), Some(2));
    assert_eq!(report.failures[1].1[0].kind(), "build");
}

#[test]
fn test_check_without_template_dir() {
    let dir = tempdir().unwrap();
    let config = Config::load_from(dir.path()).unwrap();
    assert!(check_templates(&config, dir.path()).is_err());
}

#[test]
fn test_load_data() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("data.json");
    fs::write(&file, r#"{"title": "Home"}"#).unwrap();

    let from_file = load_data(Some(&file), None).unwrap();
    assert_eq!(from_file.get("title"), Some(&Data::from("Home")));

    let inline = load_data(None, Some("[1, 2]")).unwrap();
    assert_eq!(inline, Data::from(json!([1, 2])));

    assert!(load_data(None, None).unwrap().is_null());
    assert!(load_data(Some(&file), Some("{}")).is_err());
    assert!(load_data(None, Some("{nope")).is_err());
}
