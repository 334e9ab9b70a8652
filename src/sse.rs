//! 上游 SSE 流的行切分与内容累积

use crate::types::StreamEvent;

const DATA_PREFIX: &str = "data: ";

/// 跨数据块拼接不完整的行
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    incomplete: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入一个数据块，返回其中已完整的行（去掉换行符）
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.incomplete.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.incomplete.iter().position(|&b| b == b'\n') {
            let rest = self.incomplete.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.incomplete, rest);
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            // 按完整行解码，避免多字节字符被数据块边界截断
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// 流结束时取出最后一行（可能没有换行符）
    pub fn finish(&mut self) -> Option<String> {
        if self.incomplete.is_empty() {
            return None;
        }
        let mut line = std::mem::take(&mut self.incomplete);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

/// 解析单行 SSE，返回其中的 `message.content` 片段
///
/// 非 `data: ` 行和无法解析的 JSON 都返回 `None`。
pub fn parse_data_line(line: &str) -> Option<String> {
    let data = line.strip_prefix(DATA_PREFIX)?;
    serde_json::from_str::<StreamEvent>(data)
        .ok()
        .and_then(StreamEvent::into_content)
}

/// 按到达顺序累积内容片段
#[derive(Debug, Default)]
pub struct ContentAccumulator {
    buffer: SseLineBuffer,
    content: String,
    fragments: usize,
}

impl ContentAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chunk(&mut self, bytes: &[u8]) {
        for line in self.buffer.feed(bytes) {
            self.push_line(&line);
        }
    }

    pub fn push_line(&mut self, line: &str) {
        if let Some(fragment) = parse_data_line(line) {
            self.content.push_str(&fragment);
            self.fragments += 1;
        }
    }

    pub fn fragments(&self) -> usize {
        self.fragments
    }

    /// 处理剩余数据并返回去除首尾空白后的内容
    pub fn finish(mut self) -> String {
        if let Some(line) = self.buffer.finish() {
            self.push_line(&line);
        }
        self.content.trim().to_string()
    }
}
