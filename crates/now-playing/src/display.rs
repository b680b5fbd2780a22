//! One-line rendering of listener results.

use moe_socket::{PlaybackInfo, SocketResult};

pub fn render(result: &SocketResult) -> String {
    match result {
        SocketResult::Response(info) => render_info(info),
        SocketResult::Error => "(gateway sent an unreadable update)".to_string(),
    }
}

fn render_info(info: &PlaybackInfo) -> String {
    let mut line = format!("♪ {}", info.track);
    if !info.anime_name.is_empty() {
        line.push_str(&format!(" [{}]", info.anime_name));
    }
    if info.is_requested() {
        line.push_str(&format!(" requested by {}", info.requested_by));
    }
    line.push_str(&format!(" · {} listening", info.listeners));
    if let Some(last) = &info.last {
        line.push_str(&format!(" · previously {last}"));
    }
    line
}
