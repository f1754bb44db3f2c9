use std::sync::OnceLock;

use regex::Regex;

pub const HEADER_FILE_FORMAT_KEY: &str = "FILE_FORMAT";
pub const HEADER_CREATED_KEY: &str = "CREATED";
pub const HEADER_SOURCE_COLUMN_KEY: &str = "SOURCE_COLUMN";
pub const HEADER_COLUMNS_KEY: &str = "COLUMNS";
pub const HEADER_SERIAL_KEY: &str = "SERIAL";
pub const HEADER_LINE_COUNT_KEY: &str = "LINE_COUNT";
pub const HEADER_USE_HISTORY_KEY: &str = "USE_HISTORY";
pub const HEADER_UNIQUE_TAGS_KEY: &str = "UNIQUE_TAGS";
pub const HEADER_VALIDATE_FILES_KEY: &str = "VALIDATE_FILES";
pub const HEADER_BUCKETIZE_KEY: &str = "BUCKETIZE";

pub const DEFAULT_FILE_FORMAT: &str = "1.0";
pub const DEFAULT_SOURCE_COLUMN: &str = "PN";

pub const DICTIONARY_COLUMNS: [&str; 7] = [
    "File", "Alias", "ChrStart", "PosStart", "ChrStop", "PosStop", "Tags",
];

fn property_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^##\s*([^=\s]+)\s*=\s*(.*?)\s*$").expect("static regex"))
}

/// 表头：`## KEY = VALUE` 属性行 + `# col\tcol` 列名行
///
/// 属性保持插入顺序，便于 diff。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TableHeader {
    props: Vec<(String, String)>,
    columns: Vec<String>,
}

impl TableHeader {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新建 dictionary 表的默认头
    pub fn for_dictionary(created: &str) -> Self {
        let mut h = Self::new();
        h.set_property(HEADER_FILE_FORMAT_KEY, DEFAULT_FILE_FORMAT);
        h.set_property(HEADER_CREATED_KEY, created);
        h.set_property(HEADER_SERIAL_KEY, "0");
        h.set_columns(DICTIONARY_COLUMNS.iter().map(|c| c.to_string()).collect());
        h
    }

    /// 尝试吸收一行表头；非表头行返回 false
    pub fn parse_line(&mut self, line: &str) -> bool {
        let line = line.trim_end_matches(&['\n', '\r'][..]);
        if line.starts_with("##") {
            if let Some(c) = property_re().captures(line) {
                self.set_property(&c[1], &c[2]);
            }
            true
        } else if let Some(cols) = line.strip_prefix('#') {
            self.columns = cols.split('\t').map(|c| c.trim().to_string()).collect();
            true
        } else {
            false
        }
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.props
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.property(key).is_some()
    }

    pub fn set_property(&mut self, key: &str, value: &str) {
        match self.props.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value.to_string(),
            None => self.props.push((key.to_string(), value.to_string())),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn set_columns(&mut self, columns: Vec<String>) {
        self.columns = columns;
    }

    /// 列名不是占位（col1, col2 ...）即视为 proper
    pub fn is_proper(&self) -> bool {
        !self.columns.is_empty()
            && !self
                .columns
                .iter()
                .enumerate()
                .all(|(i, c)| c.eq_ignore_ascii_case(&format!("col{}", i + 1)))
    }

    pub fn serial(&self) -> u64 {
        self.property(HEADER_SERIAL_KEY)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }

    pub fn bump_serial(&mut self) -> u64 {
        let next = self.serial() + 1;
        self.set_property(HEADER_SERIAL_KEY, &next.to_string());
        next
    }

    /// 格式化为表头行（每行以 `\n` 结尾）
    pub fn format(&self) -> String {
        let mut out = String::new();
        for (k, v) in &self.props {
            out.push_str(&format!("## {} = {}\n", k, v));
        }
        if !self.columns.is_empty() {
            out.push('#');
            out.push_str(&self.columns.join("\t"));
            out.push('\n');
        }
        out
    }
}
