//! properties 格式解析

/// 解析 properties 文本，返回按出现顺序排列的键值对
///
/// 支持 `#`/`!` 注释、`=`/`:`/空白分隔符、行尾 `\` 续行以及常见转义。
pub fn parse_properties(text: &str) -> Vec<(String, String)> {
    logical_lines(text)
        .into_iter()
        .filter(|line| is_significant(line))
        .map(|line| split_key_value(&line))
        .collect()
}

/// 文本是否具备 properties 形态
///
/// 至少一行键值对，且每个有效行都含有未转义的 `=` 或 `:`。
pub fn looks_like_properties(text: &str) -> bool {
    let lines: Vec<String> = logical_lines(text)
        .into_iter()
        .filter(|line| is_significant(line))
        .collect();

    !lines.is_empty() && lines.iter().all(|line| find_separator(line).is_some())
}

fn is_significant(line: &str) -> bool {
    let trimmed = line.trim_start();
    !(trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!'))
}

/// 合并续行：以奇数个反斜杠结尾的行与下一行相连，下一行的前导空白被去掉
fn logical_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current: Option<String> = None;

    for raw in text.lines() {
        let piece = match current {
            Some(_) => raw.trim_start(),
            None => raw,
        };

        let is_comment = current.is_none() && !is_significant(piece);
        let continues = !is_comment && ends_with_continuation(piece);
        let content = if continues {
            &piece[..piece.len() - 1]
        } else {
            piece
        };

        let mut line = current.take().unwrap_or_default();
        line.push_str(content);

        if continues {
            current = Some(line);
        } else {
            lines.push(line);
        }
    }

    if let Some(line) = current {
        lines.push(line);
    }

    lines
}

fn ends_with_continuation(line: &str) -> bool {
    let trailing = line.chars().rev().take_while(|ch| *ch == '\\').count();
    trailing % 2 == 1
}

/// 第一个未转义的 `=` 或 `:` 的字节位置
fn find_separator(line: &str) -> Option<usize> {
    let mut escaped = false;
    for (index, ch) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '=' | ':' => return Some(index),
            _ => {}
        }
    }
    None
}

fn split_key_value(line: &str) -> (String, String) {
    let line = line.trim_start();
    let mut key_end = line.len();
    let mut escaped = false;

    for (index, ch) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if ch == '\\' {
            escaped = true;
        } else if ch == '=' || ch == ':' || ch.is_whitespace() {
            key_end = index;
            break;
        }
    }

    let key = &line[..key_end];
    let mut rest = line[key_end..].trim_start();
    if rest.starts_with('=') || rest.starts_with(':') {
        rest = rest[1..].trim_start();
    }

    (unescape(key), unescape(rest))
}

fn unescape(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            result.push(ch);
            continue;
        }
        match chars.next() {
            Some('t') => result.push('\t'),
            Some('n') => result.push('\n'),
            Some('r') => result.push('\r'),
            Some('f') => result.push('\u{000C}'),
            Some('u') => {
                let hex: String = chars.clone().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) if hex.len() == 4 => {
                        result.push(decoded);
                        for _ in 0..4 {
                            chars.next();
                        }
                    }
                    _ => result.push('u'),
                }
            }
            Some(other) => result.push(other),
            None => {}
        }
    }

    result
}
