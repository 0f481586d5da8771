//! Text chunking for knowledge indexing.
//!
//! NPC background files are markdown: one section per topic. Splitting on
//! headings keeps each chunk about one thing, and prefixing the heading path
//! ("Elara > Background > Childhood") keeps the topic attached to the text
//! once it is embedded on its own.

/// Split markdown on headings, prefixing each chunk with its heading path.
///
/// Text before the first heading becomes a chunk without a prefix. Sections
/// with no body are dropped. Headings inside fenced code blocks are body text.
pub fn chunk_markdown(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut path: Vec<(usize, String)> = Vec::new();
    let mut body: Vec<&str> = Vec::new();
    let mut in_fence = false;

    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            body.push(line);
            continue;
        }

        match (!in_fence).then(|| parse_heading(line)).flatten() {
            Some((level, title)) => {
                flush(&mut chunks, &path, &body);
                body.clear();
                while path.last().is_some_and(|(l, _)| *l >= level) {
                    path.pop();
                }
                path.push((level, title.to_string()));
            }
            None => body.push(line),
        }
    }
    flush(&mut chunks, &path, &body);

    chunks
}

fn flush(chunks: &mut Vec<String>, path: &[(usize, String)], body: &[&str]) {
    let content = body.join("\n");
    let content = content.trim();
    if content.is_empty() {
        return;
    }
    if path.is_empty() {
        chunks.push(content.to_string());
    } else {
        let heading = path
            .iter()
            .map(|(_, t)| t.as_str())
            .collect::<Vec<_>>()
            .join(" > ");
        chunks.push(format!("{heading}\n\n{content}"));
    }
}

/// ATX heading: 1-6 `#` followed by a space.
fn parse_heading(line: &str) -> Option<(usize, &str)> {
    let level = line.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &line[level..];
    if !rest.starts_with(' ') && !rest.is_empty() {
        return None;
    }
    let title = rest.trim().trim_end_matches('#').trim();
    if title.is_empty() {
        return None;
    }
    Some((level, title))
}
