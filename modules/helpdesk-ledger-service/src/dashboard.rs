//! Dashboard HTML page handler.
//!
//! Serves a self-contained HTML page showing ledger stats and the most-asked
//! questions.

use crate::db;
use crate::routes::AppState;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use std::sync::Arc;

const TOP_QUERIES: usize = 25;

pub async fn dashboard(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = db::blocking(&state.db, |db| db.get_stats()).await.ok();
    let top = db::blocking(&state.db, |db| db.list_records(TOP_QUERIES))
        .await
        .unwrap_or_default();
    let uptime = state.start_time.elapsed().as_secs();
    let config = &state.config;

    let stats_html = if let Some(s) = &stats {
        format!(
            r#"<div class="stats">
                <div class="stat"><span class="val">{}</span><span class="lbl">Questions</span></div>
                <div class="stat"><span class="val">{}</span><span class="lbl">Searches</span></div>
                <div class="stat"><span class="val">{}</span><span class="lbl">Users</span></div>
                <div class="stat"><span class="val">{}</span><span class="lbl">FAQ Entries</span></div>
            </div>"#,
            s.distinct_queries,
            s.total_searches,
            s.distinct_users,
            state.kb.len()
        )
    } else {
        "<p>No stats available.</p>".to_string()
    };

    let mut query_rows = String::new();
    for r in &top {
        let last_utterance = r.utterances.last().map(String::as_str).unwrap_or("-");
        query_rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td class=\"mono\">{}</td></tr>\n",
            escape(&r.search_query),
            r.search_count,
            r.user_ids.len(),
            escape(last_utterance),
            r.last_searched.as_deref().unwrap_or("-"),
            r.created_on
        ));
    }
    if query_rows.is_empty() {
        query_rows = "<tr><td colspan=\"6\">No questions recorded yet.</td></tr>".to_string();
    }

    let ledger_state = if state.ledger.is_enabled() {
        "recording"
    } else {
        "paused"
    };

    let html = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Help Desk Ledger</title>
<style>
  * {{ margin: 0; padding: 0; box-sizing: border-box; }}
  body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; background: #0f1117; color: #e0e0e0; padding: 20px; }}
  h1 {{ color: #58a6ff; margin-bottom: 8px; }}
  .meta {{ color: #8b949e; font-size: 0.85em; margin-bottom: 20px; }}
  .stats {{ display: flex; gap: 16px; margin-bottom: 24px; flex-wrap: wrap; }}
  .stat {{ background: #161b22; border: 1px solid #30363d; border-radius: 8px; padding: 16px 24px; text-align: center; min-width: 120px; }}
  .stat .val {{ display: block; font-size: 2em; font-weight: bold; color: #58a6ff; }}
  .stat .lbl {{ display: block; font-size: 0.85em; color: #8b949e; margin-top: 4px; }}
  table {{ width: 100%; border-collapse: collapse; margin-bottom: 24px; }}
  th {{ background: #161b22; color: #8b949e; text-align: left; padding: 8px 12px; font-size: 0.85em; text-transform: uppercase; border-bottom: 1px solid #30363d; }}
  td {{ padding: 8px 12px; border-bottom: 1px solid #21262d; font-size: 0.9em; }}
  tr:hover {{ background: #161b22; }}
  .mono {{ font-family: 'SF Mono', 'Consolas', monospace; font-size: 0.85em; }}
  h2 {{ color: #c9d1d9; margin-bottom: 12px; font-size: 1.1em; }}
  .section {{ margin-bottom: 28px; }}
</style>
</head>
<body>
  <h1>Help Desk Ledger</h1>
  <p class="meta">Uptime: {uptime_str} &middot; Ledger: {ledger_state} &middot; Table: {table} &middot; {tag_key}: {owner} / {environment} / {region}</p>

  {stats_html}

  <div class="section">
    <h2>Most Asked</h2>
    <table>
      <thead><tr><th>Question</th><th>Count</th><th>Askers</th><th>Latest Utterance</th><th>Last Searched</th><th>First Seen</th></tr></thead>
      <tbody>{query_rows}</tbody>
    </table>
  </div>

  <script>
    setTimeout(() => location.reload(), 30000);
  </script>
</body>
</html>"#,
        uptime_str = format_uptime(uptime),
        ledger_state = ledger_state,
        table = state.db.table_name(),
        tag_key = escape(&config.tag_key),
        owner = escape(&config.owner),
        environment = escape(&config.environment),
        region = escape(&config.region),
        stats_html = stats_html,
        query_rows = query_rows,
    );

    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], html)
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn format_uptime(secs: u64) -> String {
    const UNITS: [(&str, u64); 3] = [("d", 86_400), ("h", 3_600), ("m", 60)];
    let mut rest = secs;
    let mut parts: Vec<String> = Vec::new();
    for (suffix, size) in UNITS {
        // Once a larger unit is shown, every smaller one is too
        if rest >= size || !parts.is_empty() {
            parts.push(format!("{}{}", rest / size, suffix));
            rest %= size;
        }
    }
    parts.push(format!("{}s", rest));
    parts.join(" ")
}
