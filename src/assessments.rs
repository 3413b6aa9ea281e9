use axum::{response::Html, routing::get, Router};
use tracing::instrument;

use crate::state::AppState;

const PAGE_TITLE: &str = "Assessments";

pub fn router() -> Router<AppState> {
    Router::new().route("/assessments", get(page))
}

/// Dashboard page listing assessments. The cards are filled in client side.
#[instrument]
pub async fn page() -> Html<String> {
    Html(render_page(PAGE_TITLE))
}

fn render_page(title: &str) -> String {
    format!(
        r#"<!doctype html>
<html lang="en">
<head><meta charset="utf-8"><title>{title}</title></head>
<body>
  <header class="page-header"><h1>{title}</h1></header>
  <hr class="separator">
  <main>
    <section class="assessment-cards" data-component="many-assessment-card"></section>
  </main>
</body>
</html>
"#
    )
}
