//! Dev-notes domain library: a structured markdown scratchpad shared by a team.
//!
//! The backing file is a single markdown document with one section per day,
//! one subsection per (user, branch) pair, and typed content blocks (Todo,
//! Notes, Ideas) inside each subsection. The modules here keep the core pure:
//! callers supply parsed documents plus the invoking date/user/branch and get
//! mutated documents back; all filesystem and git concerns stay in the binary.

pub mod core {
    use std::fmt;
    use std::str::FromStr;

    use chrono::NaiveDate;
    use serde::{Deserialize, Serialize};
    use thiserror::Error;

    /// Heading text of the free-form context block near the top of the file.
    pub const PROJECT_CONTEXT_LABEL: &str = "Project Context";

    /// Prefix of the provenance note attached to carried-forward tasks.
    pub const CARRIED_FROM_PREFIX: &str = "carried from ";

    /* ------------------------------- Errors ------------------------------- */

    /// Expected failure conditions, returned as values across the core
    /// boundary. Validation always runs before any mutation is applied.
    #[derive(Debug, Clone, PartialEq, Eq, Error)]
    pub enum EditError {
        #[error("invalid date format: {0:?} (use YYYY-MM-DD)")]
        InvalidDateFormat(String),
        #[error("invalid section type: {0:?} (use Todo, Notes, or Ideas)")]
        InvalidSectionType(String),
        #[error("content cannot be empty")]
        EmptyContent,
        #[error("no task found containing {0:?}")]
        TaskNotFound(String),
        /// Reserved for structurally unrecoverable input. The parser degrades
        /// malformed lines to opaque content instead, so in practice this is
        /// never produced.
        #[error("document structure is unrecoverable")]
        MalformedDocument,
    }

    /* ---------------------------- Value objects ---------------------------- */

    /// Typed content bucket inside a user subsection. The variant order is the
    /// canonical rendering order for newly created blocks.
    #[derive(
        Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    )]
    pub enum BlockType {
        Todo,
        Notes,
        Ideas,
    }

    impl BlockType {
        /// Case-sensitive match against the three recognized labels.
        pub fn from_label(label: &str) -> Option<Self> {
            match label {
                "Todo" => Some(Self::Todo),
                "Notes" => Some(Self::Notes),
                "Ideas" => Some(Self::Ideas),
                _ => None,
            }
        }

        pub fn label(self) -> &'static str {
            match self {
                Self::Todo => "Todo",
                Self::Notes => "Notes",
                Self::Ideas => "Ideas",
            }
        }
    }

    impl fmt::Display for BlockType {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.label())
        }
    }

    impl FromStr for BlockType {
        type Err = EditError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            Self::from_label(s).ok_or_else(|| EditError::InvalidSectionType(s.to_string()))
        }
    }

    /// Check both the `YYYY-MM-DD` shape and calendar validity of a date
    /// string. Date strings are stored verbatim and never reformatted, so the
    /// check is purely a gate.
    pub fn valid_date(s: &str) -> bool {
        let bytes = s.as_bytes();
        if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
            return false;
        }
        let digits_ok = bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit());
        if !digits_ok {
            return false;
        }
        let (Ok(year), Ok(month), Ok(day)) = (
            s[0..4].parse::<i32>(),
            s[5..7].parse::<u32>(),
            s[8..10].parse::<u32>(),
        ) else {
            return false;
        };
        NaiveDate::from_ymd_opt(year, month, day).is_some()
    }

    /* ------------------------------ Entities ------------------------------ */

    /// One line of content. Checkbox tasks carry a done flag; plain bullets
    /// (Notes/Ideas) do not. `provenance` holds the `carried from YYYY-MM-DD`
    /// note, rendered as a parenthesized suffix after the text.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Item {
        pub text: String,
        pub checkbox: Option<bool>,
        pub provenance: Option<String>,
    }

    impl Item {
        pub fn task(text: impl Into<String>) -> Self {
            Self {
                text: text.into(),
                checkbox: Some(false),
                provenance: None,
            }
        }

        pub fn bullet(text: impl Into<String>) -> Self {
            Self {
                text: text.into(),
                checkbox: None,
                provenance: None,
            }
        }

        /// An unchecked `- [ ]` task, eligible for complete and carry.
        pub fn is_open_task(&self) -> bool {
            self.checkbox == Some(false)
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub enum BlockEntry {
        Item(Item),
        /// A line inside a block the grammar does not own (prose, fences,
        /// blanks); re-emitted verbatim in place.
        Opaque(String),
    }

    impl BlockEntry {
        pub fn as_item(&self) -> Option<&Item> {
            match self {
                Self::Item(item) => Some(item),
                Self::Opaque(_) => None,
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Block {
        pub kind: BlockType,
        pub entries: Vec<BlockEntry>,
    }

    impl Block {
        pub fn new(kind: BlockType) -> Self {
            Self {
                kind,
                entries: Vec::new(),
            }
        }

        pub fn items(&self) -> impl Iterator<Item = &Item> {
            self.entries.iter().filter_map(BlockEntry::as_item)
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub enum SubNode {
        Block(Block),
        Opaque(String),
    }

    /// Per-(user, branch) grouping inside a date section. Holds at most one
    /// block per `BlockType`, plus any opaque lines found between them.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct UserSubsection {
        pub handle: String,
        pub branch: String,
        pub nodes: Vec<SubNode>,
    }

    impl UserSubsection {
        pub fn new(handle: impl Into<String>, branch: impl Into<String>) -> Self {
            Self {
                handle: handle.into(),
                branch: branch.into(),
                nodes: Vec::new(),
            }
        }

        /// Rendered heading text: `handle-branch (@handle)`, or
        /// `handle (@handle)` when the branch is empty.
        pub fn label(&self) -> String {
            if self.branch.is_empty() {
                format!("{} (@{})", self.handle, self.handle)
            } else {
                format!("{}-{} (@{})", self.handle, self.branch, self.handle)
            }
        }

        pub fn block(&self, kind: BlockType) -> Option<&Block> {
            self.nodes.iter().find_map(|n| match n {
                SubNode::Block(b) if b.kind == kind => Some(b),
                _ => None,
            })
        }

        pub fn blocks(&self) -> impl Iterator<Item = &Block> {
            self.nodes.iter().filter_map(|n| match n {
                SubNode::Block(b) => Some(b),
                SubNode::Opaque(_) => None,
            })
        }

        pub(crate) fn block_index(&self, kind: BlockType) -> Option<usize> {
            self.nodes
                .iter()
                .position(|n| matches!(n, SubNode::Block(b) if b.kind == kind))
        }

        pub(crate) fn block_at_mut(&mut self, idx: usize) -> &mut Block {
            match &mut self.nodes[idx] {
                SubNode::Block(b) => b,
                SubNode::Opaque(_) => unreachable!("index points at a block"),
            }
        }

        /// New blocks are slotted so a subsection always reads Todo, Notes,
        /// Ideas regardless of creation order; parsed blocks keep their file
        /// order.
        pub(crate) fn ensure_block_index(&mut self, kind: BlockType) -> usize {
            if let Some(idx) = self.block_index(kind) {
                return idx;
            }
            let pos = self
                .nodes
                .iter()
                .rposition(|n| matches!(n, SubNode::Block(b) if b.kind <= kind))
                .map(|i| i + 1)
                .or_else(|| {
                    self.nodes
                        .iter()
                        .position(|n| matches!(n, SubNode::Block(_)))
                })
                .unwrap_or(self.nodes.len());
            self.nodes.insert(pos, SubNode::Block(Block::new(kind)));
            pos
        }

        pub fn ensure_block(&mut self, kind: BlockType) -> &mut Block {
            let idx = self.ensure_block_index(kind);
            self.block_at_mut(idx)
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub enum DateNode {
        User(UserSubsection),
        Opaque(String),
    }

    /// Top-level grouping of content for one calendar day. The date string is
    /// the section key and is never rewritten.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct DateSection {
        pub date: String,
        pub nodes: Vec<DateNode>,
    }

    impl DateSection {
        pub fn new(date: impl Into<String>) -> Self {
            Self {
                date: date.into(),
                nodes: Vec::new(),
            }
        }

        pub fn subsections(&self) -> impl Iterator<Item = &UserSubsection> {
            self.nodes.iter().filter_map(|n| match n {
                DateNode::User(u) => Some(u),
                DateNode::Opaque(_) => None,
            })
        }

        pub fn subsection(&self, handle: &str, branch: &str) -> Option<&UserSubsection> {
            self.subsections()
                .find(|u| u.handle == handle && u.branch == branch)
        }

        pub(crate) fn subsection_index(&self, handle: &str, branch: &str) -> Option<usize> {
            self.nodes.iter().position(
                |n| matches!(n, DateNode::User(u) if u.handle == handle && u.branch == branch),
            )
        }

        pub(crate) fn subsection_at_mut(&mut self, idx: usize) -> &mut UserSubsection {
            match &mut self.nodes[idx] {
                DateNode::User(u) => u,
                DateNode::Opaque(_) => unreachable!("index points at a subsection"),
            }
        }

        pub(crate) fn ensure_subsection_index(&mut self, handle: &str, branch: &str) -> usize {
            if let Some(idx) = self.subsection_index(handle, branch) {
                return idx;
            }
            self.nodes
                .push(DateNode::User(UserSubsection::new(handle, branch)));
            self.nodes.len() - 1
        }

        /// A user editing twice in one day re-uses the existing subsection.
        pub fn ensure_subsection(&mut self, handle: &str, branch: &str) -> &mut UserSubsection {
            let idx = self.ensure_subsection_index(handle, branch);
            self.subsection_at_mut(idx)
        }
    }

    /// Free text between `## Project Context` and the next `##` header,
    /// captured verbatim.
    #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct ProjectContext {
        pub lines: Vec<String>,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub enum TopNode {
        ProjectContext(ProjectContext),
        Date(DateSection),
        /// Any top-level line outside the known structure: the title, prose,
        /// blank lines, unrecognized headers.
        Opaque(String),
    }

    /* ------------------------------ Aggregate ------------------------------ */

    /// The whole scratchpad file. Node order is first-seen source order; date
    /// sections are never sorted by date value.
    #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct Document {
        pub nodes: Vec<TopNode>,
    }

    impl Document {
        /// Starter document written when no file exists yet.
        pub fn seeded() -> Self {
            Self {
                nodes: vec![
                    TopNode::Opaque("# Dev Notes".to_string()),
                    TopNode::ProjectContext(ProjectContext {
                        lines: vec![
                            String::new(),
                            "*Add project-level context, goals, and background information here.*"
                                .to_string(),
                            String::new(),
                        ],
                    }),
                ],
            }
        }

        pub fn project_context(&self) -> Option<&ProjectContext> {
            self.nodes.iter().find_map(|n| match n {
                TopNode::ProjectContext(cx) => Some(cx),
                _ => None,
            })
        }

        pub(crate) fn project_context_mut(&mut self) -> Option<&mut ProjectContext> {
            self.nodes.iter_mut().find_map(|n| match n {
                TopNode::ProjectContext(cx) => Some(cx),
                _ => None,
            })
        }

        pub fn date_sections(&self) -> impl Iterator<Item = &DateSection> {
            self.nodes.iter().filter_map(|n| match n {
                TopNode::Date(s) => Some(s),
                _ => None,
            })
        }

        pub fn section(&self, date: &str) -> Option<&DateSection> {
            self.date_sections().find(|s| s.date == date)
        }

        pub(crate) fn section_index(&self, date: &str) -> Option<usize> {
            self.nodes
                .iter()
                .position(|n| matches!(n, TopNode::Date(s) if s.date == date))
        }

        pub(crate) fn section_at_mut(&mut self, idx: usize) -> &mut DateSection {
            match &mut self.nodes[idx] {
                TopNode::Date(s) => s,
                _ => unreachable!("index points at a date section"),
            }
        }

        pub(crate) fn ensure_section_index(&mut self, date: &str) -> usize {
            if let Some(idx) = self.section_index(date) {
                return idx;
            }
            self.nodes.push(TopNode::Date(DateSection::new(date)));
            self.nodes.len() - 1
        }

        /// New date sections are appended at the end of the document.
        pub fn ensure_section(&mut self, date: &str) -> &mut DateSection {
            let idx = self.ensure_section_index(date);
            self.section_at_mut(idx)
        }
    }

}

pub mod parser {
    //! Line classifier and single-pass document parser.
    //!
    //! The classifier maps one raw line to a structural role via prefix rules;
    //! the parser folds the line sequence into the `core` tree while keeping a
    //! cursor over the currently open date section, subsection, and block.
    //! Malformed input never aborts a parse: anything the grammar does not own
    //! degrades to an opaque line preserved in place, so round-tripping a
    //! hand-edited file loses nothing.

    use nom::{
        IResult,
        branch::alt,
        bytes::complete::{tag, take_while1},
        character::complete::char,
    };

    use crate::core::*;

    /* ---------------------------- Line classifier ---------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum LineKind<'a> {
        /// `# ` document title.
        Title(&'a str),
        /// `## ` header; either `Project Context`, a date, or unknown.
        SectionHeader(&'a str),
        /// `### key (@handle)` where key is the handle or `handle-branch`.
        UserHeader { key: &'a str, handle: &'a str },
        /// Any other `### ` header.
        SubHeader(&'a str),
        /// `#### ` header naming one of the three block labels.
        BlockHeader(BlockType),
        /// `#### ` header with an unrecognized label.
        UnknownBlockHeader(&'a str),
        /// `- [ ] ` / `- [x] ` with exact spacing.
        Checkbox { done: bool, text: &'a str },
        /// `- ` plain bullet.
        Bullet(&'a str),
        Blank,
        Opaque(&'a str),
    }

    fn header(i: &str) -> IResult<&str, usize> {
        let (i, hashes) = take_while1(|c| c == '#')(i)?;
        let (i, _) = char(' ')(i)?;
        Ok((i, hashes.len()))
    }

    fn checkbox(i: &str) -> IResult<&str, bool> {
        let (i, _) = tag("- [")(i)?;
        let (i, mark) = alt((char(' '), char('x')))(i)?;
        let (i, _) = tag("] ")(i)?;
        Ok((i, mark == 'x'))
    }

    fn bullet(i: &str) -> IResult<&str, &str> {
        tag("- ")(i)
    }

    pub fn classify(line: &str) -> LineKind<'_> {
        if line.is_empty() {
            return LineKind::Blank;
        }
        if let Ok((text, level)) = header(line) {
            return match level {
                1 => LineKind::Title(text),
                2 => LineKind::SectionHeader(text),
                3 => match split_user_label(text) {
                    Some((key, handle)) => LineKind::UserHeader { key, handle },
                    None => LineKind::SubHeader(text),
                },
                4 => match BlockType::from_label(text) {
                    Some(kind) => LineKind::BlockHeader(kind),
                    None => LineKind::UnknownBlockHeader(text),
                },
                _ => LineKind::Opaque(line),
            };
        }
        if let Ok((text, done)) = checkbox(line) {
            return LineKind::Checkbox { done, text };
        }
        if let Ok((text, _)) = bullet(line) {
            return LineKind::Bullet(text);
        }
        LineKind::Opaque(line)
    }

    /// Split `text (@handle)` into the left-hand text and the handle.
    fn split_attribution(text: &str) -> Option<(&str, &str)> {
        let open = text.rfind(" (@")?;
        let handle = text[open..].strip_prefix(" (@")?.strip_suffix(')')?;
        if handle.is_empty() || open == 0 {
            return None;
        }
        Some((&text[..open], handle))
    }

    /// Recognize a user header label. The key must be the bare handle or the
    /// handle followed by a hyphenated branch; anything else stays opaque.
    fn split_user_label(text: &str) -> Option<(&str, &str)> {
        let (key, handle) = split_attribution(text)?;
        match key.strip_prefix(handle) {
            Some("") => Some((key, handle)),
            Some(rest) if rest.starts_with('-') && rest.len() > 1 => Some((key, handle)),
            _ => None,
        }
    }

    pub(crate) fn split_branch<'a>(key: &'a str, handle: &str) -> &'a str {
        key.strip_prefix(handle)
            .and_then(|rest| rest.strip_prefix('-'))
            .unwrap_or("")
    }

    /// Strip a trailing `(carried from YYYY-MM-DD)` note off task text.
    pub(crate) fn split_provenance(text: &str) -> (String, Option<String>) {
        let marker = format!(" ({CARRIED_FROM_PREFIX}");
        if let Some(stripped) = text.strip_suffix(')') {
            if let Some(pos) = stripped.rfind(&marker) {
                let date = &stripped[pos + marker.len()..];
                if valid_date(date) {
                    return (
                        text[..pos].to_string(),
                        Some(format!("{CARRIED_FROM_PREFIX}{date}")),
                    );
                }
            }
        }
        (text.to_string(), None)
    }

    /* ---------------------------- Document parser ---------------------------- */

    /// Parse a scratchpad document. Never fails; see the module notes on
    /// opaque-content degradation.
    pub fn parse_document(text: &str) -> Document {
        parse_with(text, false)
    }

    /// Shared parse loop. With `legacy` set, flat `## DATE (@handle)` headers
    /// and `### `-level block labels from the pre-migration format are
    /// understood and re-nested; the migration transformer builds on this.
    pub(crate) fn parse_with(text: &str, legacy: bool) -> Document {
        let mut builder = DocBuilder::new(legacy);
        for line in text.lines() {
            builder.push_line(line);
        }
        builder.doc
    }

    /// Cursor-based builder: indices instead of borrows so state survives
    /// across lines. `None` at any level means that level is closed.
    struct DocBuilder {
        doc: Document,
        legacy: bool,
        context_open: bool,
        date: Option<usize>,
        user: Option<usize>,
        block: Option<usize>,
    }

    impl DocBuilder {
        fn new(legacy: bool) -> Self {
            Self {
                doc: Document::default(),
                legacy,
                context_open: false,
                date: None,
                user: None,
                block: None,
            }
        }

        fn close_all(&mut self) {
            self.context_open = false;
            self.date = None;
            self.user = None;
            self.block = None;
        }

        fn push_line(&mut self, line: &str) {
            match classify(line) {
                LineKind::SectionHeader(text) => self.open_section(text, line),
                LineKind::UserHeader { key, handle } if !self.context_open => {
                    self.open_user(key, handle, line)
                }
                LineKind::SubHeader(text) if !self.context_open => self.open_sub_header(text, line),
                LineKind::BlockHeader(kind) if !self.context_open => self.open_block(kind, line),
                LineKind::UnknownBlockHeader(_) if !self.context_open => {
                    self.block = None;
                    self.push_opaque(line);
                }
                LineKind::Checkbox { done, text } if !self.context_open => {
                    self.push_item(Some(done), text, line)
                }
                LineKind::Bullet(text) if !self.context_open => self.push_item(None, text, line),
                // Titles, blanks, anything unclassifiable, and every line
                // inside an open Project Context block.
                _ => self.push_opaque(line),
            }
        }

        fn open_section(&mut self, text: &str, line: &str) {
            if text == PROJECT_CONTEXT_LABEL {
                self.close_all();
                if self.doc.project_context().is_none() {
                    self.doc
                        .nodes
                        .push(TopNode::ProjectContext(ProjectContext::default()));
                    self.context_open = true;
                } else {
                    // A second context header is out of contract; keep it as-is.
                    self.doc.nodes.push(TopNode::Opaque(line.to_string()));
                }
                return;
            }
            if self.legacy {
                if let Some((date, handle)) = split_attribution(text) {
                    if valid_date(date) {
                        self.close_all();
                        let di = self.doc.ensure_section_index(date);
                        let ui = self
                            .doc
                            .section_at_mut(di)
                            .ensure_subsection_index(handle, "");
                        self.date = Some(di);
                        self.user = Some(ui);
                        return;
                    }
                }
            }
            self.close_all();
            if valid_date(text) {
                self.date = Some(self.doc.ensure_section_index(text));
            } else {
                self.doc.nodes.push(TopNode::Opaque(line.to_string()));
            }
        }

        fn open_user(&mut self, key: &str, handle: &str, line: &str) {
            let Some(di) = self.date else {
                self.push_opaque(line);
                return;
            };
            let branch = split_branch(key, handle);
            let ui = self
                .doc
                .section_at_mut(di)
                .ensure_subsection_index(handle, branch);
            self.user = Some(ui);
            self.block = None;
        }

        fn open_sub_header(&mut self, text: &str, line: &str) {
            if self.legacy && self.user.is_some() {
                if let Some(kind) = BlockType::from_label(text) {
                    self.open_block_at(kind);
                    return;
                }
            }
            self.user = None;
            self.block = None;
            self.push_opaque(line);
        }

        fn open_block(&mut self, kind: BlockType, line: &str) {
            if self.user.is_some() {
                self.open_block_at(kind);
            } else {
                self.block = None;
                self.push_opaque(line);
            }
        }

        // Blocks read from the file keep their on-disk order; the canonical
        // Todo/Notes/Ideas slotting applies only to locator-created blocks.
        fn open_block_at(&mut self, kind: BlockType) {
            let (Some(di), Some(ui)) = (self.date, self.user) else {
                return;
            };
            let sub = self.doc.section_at_mut(di).subsection_at_mut(ui);
            let bi = match sub.block_index(kind) {
                Some(idx) => idx,
                None => {
                    sub.nodes.push(SubNode::Block(Block::new(kind)));
                    sub.nodes.len() - 1
                }
            };
            self.block = Some(bi);
        }

        fn push_item(&mut self, checkbox: Option<bool>, text: &str, line: &str) {
            let (Some(di), Some(ui), Some(bi)) = (self.date, self.user, self.block) else {
                self.push_opaque(line);
                return;
            };
            let item = match checkbox {
                Some(done) => {
                    let (text, provenance) = split_provenance(text);
                    Item {
                        text,
                        checkbox: Some(done),
                        provenance,
                    }
                }
                None => Item::bullet(text),
            };
            self.doc
                .section_at_mut(di)
                .subsection_at_mut(ui)
                .block_at_mut(bi)
                .entries
                .push(BlockEntry::Item(item));
        }

        fn push_opaque(&mut self, line: &str) {
            if self.context_open {
                if let Some(cx) = self.doc.project_context_mut() {
                    cx.lines.push(line.to_string());
                    return;
                }
            }
            match (self.date, self.user, self.block) {
                (Some(di), Some(ui), Some(bi)) => self
                    .doc
                    .section_at_mut(di)
                    .subsection_at_mut(ui)
                    .block_at_mut(bi)
                    .entries
                    .push(BlockEntry::Opaque(line.to_string())),
                (Some(di), Some(ui), None) => self
                    .doc
                    .section_at_mut(di)
                    .subsection_at_mut(ui)
                    .nodes
                    .push(SubNode::Opaque(line.to_string())),
                (Some(di), None, _) => self
                    .doc
                    .section_at_mut(di)
                    .nodes
                    .push(DateNode::Opaque(line.to_string())),
                _ => self.doc.nodes.push(TopNode::Opaque(line.to_string())),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::format::format_document;

        #[test]
        fn classifier_recognizes_structural_prefixes() {
            assert_eq!(classify("# Dev Notes"), LineKind::Title("Dev Notes"));
            assert_eq!(
                classify("## 2025-10-25"),
                LineKind::SectionHeader("2025-10-25")
            );
            assert_eq!(
                classify("### alice-feature-auth (@alice)"),
                LineKind::UserHeader {
                    key: "alice-feature-auth",
                    handle: "alice"
                }
            );
            assert_eq!(classify("### Todo"), LineKind::SubHeader("Todo"));
            assert_eq!(classify("#### Todo"), LineKind::BlockHeader(BlockType::Todo));
            assert_eq!(
                classify("#### Scratch"),
                LineKind::UnknownBlockHeader("Scratch")
            );
            assert_eq!(
                classify("- [ ] Fix login bug"),
                LineKind::Checkbox {
                    done: false,
                    text: "Fix login bug"
                }
            );
            assert_eq!(
                classify("- [x] Ship release"),
                LineKind::Checkbox {
                    done: true,
                    text: "Ship release"
                }
            );
            assert_eq!(classify("- plain note"), LineKind::Bullet("plain note"));
            assert_eq!(classify(""), LineKind::Blank);
            assert_eq!(classify("just prose"), LineKind::Opaque("just prose"));
            assert_eq!(classify("##no-space"), LineKind::Opaque("##no-space"));
            assert_eq!(classify("##### deep"), LineKind::Opaque("##### deep"));
            // Sloppy checkbox spacing is a plain bullet, not a task.
            assert_eq!(classify("- [] no space"), LineKind::Bullet("[] no space"));
        }

        #[test]
        fn parser_builds_nested_hierarchy() {
            let input = "\
# Dev Notes

## Project Context

Shared sandbox for the payments team.

## 2025-10-25

### alice-feature-auth (@alice)
#### Todo
- [ ] Fix login bug
- [x] Ship release
#### Notes
- Parser groundwork

### bob (@bob)
#### Ideas
- Cache results
";
            let doc = parse_document(input);
            let cx = doc.project_context().expect("project context");
            assert!(
                cx.lines
                    .contains(&"Shared sandbox for the payments team.".to_string())
            );

            let section = doc.section("2025-10-25").expect("date section");
            let alice = section.subsection("alice", "feature-auth").expect("alice");
            let todo = alice.block(BlockType::Todo).expect("todo block");
            let texts: Vec<_> = todo.items().map(|i| i.text.as_str()).collect();
            assert_eq!(texts, vec!["Fix login bug", "Ship release"]);
            assert_eq!(
                todo.items().map(|i| i.checkbox).collect::<Vec<_>>(),
                vec![Some(false), Some(true)]
            );

            let bob = section.subsection("bob", "").expect("bob");
            let ideas = bob.block(BlockType::Ideas).expect("ideas block");
            assert_eq!(ideas.items().next().map(|i| i.checkbox), Some(None));
        }

        #[test]
        fn malformed_lines_round_trip_as_opaque() {
            let input = "\
# Dev Notes

- [ ] checkbox outside any block

## 2025-10-25

### alice (@alice)
#### Scratch
- [ ] under an unknown label
#### Todo
- [ ] real task
```
code fence kept verbatim
```

## not-a-date
- [ ] swallowed by an opaque section
";
            let doc = parse_document(input);
            // Only the one task under a recognized block is an item.
            let section = doc.section("2025-10-25").expect("section");
            let alice = section.subsection("alice", "").expect("alice");
            let todo = alice.block(BlockType::Todo).expect("todo");
            assert_eq!(todo.items().count(), 1);
            assert!(alice.block(BlockType::Notes).is_none());
            // Everything else survives serialization untouched.
            assert_eq!(format_document(&doc), input);
        }

        #[test]
        fn invalid_date_header_becomes_opaque_without_aborting() {
            let input = "\
## 2025-13-01
- [ ] lost to the calendar

## 2025-10-25

### alice (@alice)
#### Todo
- [ ] valid task
";
            let doc = parse_document(input);
            assert!(doc.section("2025-13-01").is_none());
            assert!(doc.section("2025-10-25").is_some());
            assert_eq!(format_document(&doc), input);
        }

        #[test]
        fn duplicate_date_headers_merge_into_first_section() {
            let input = "\
## 2025-10-25

### alice (@alice)
#### Todo
- [ ] first

## 2025-10-25

### bob (@bob)
#### Todo
- [ ] second
";
            let doc = parse_document(input);
            assert_eq!(doc.date_sections().count(), 1);
            let section = doc.section("2025-10-25").expect("section");
            let handles: Vec<_> = section.subsections().map(|u| u.handle.as_str()).collect();
            assert_eq!(handles, vec!["alice", "bob"]);
        }

        #[test]
        fn blocks_keep_their_on_disk_order() {
            let input = "\
## 2025-10-25

### alice (@alice)
#### Notes
- a note
#### Todo
- [ ] a task
";
            let doc = parse_document(input);
            let kinds: Vec<_> = doc
                .section("2025-10-25")
                .expect("section")
                .subsection("alice", "")
                .expect("alice")
                .blocks()
                .map(|b| b.kind)
                .collect();
            assert_eq!(kinds, vec![BlockType::Notes, BlockType::Todo]);
            assert_eq!(format_document(&doc), input);
        }

        #[test]
        fn provenance_suffix_is_split_from_task_text() {
            let (text, provenance) = split_provenance("Fix login bug (carried from 2025-10-24)");
            assert_eq!(text, "Fix login bug");
            assert_eq!(provenance.as_deref(), Some("carried from 2025-10-24"));

            let (text, provenance) = split_provenance("mention (carried from yesterday)");
            assert_eq!(text, "mention (carried from yesterday)");
            assert_eq!(provenance, None);
        }

        #[test]
        fn project_context_captures_free_text_verbatim() {
            let input = "\
# Dev Notes

## Project Context

### not a user header here
- not an item either

## 2025-10-25
";
            let doc = parse_document(input);
            let cx = doc.project_context().expect("context");
            assert_eq!(
                cx.lines,
                vec!["", "### not a user header here", "- not an item either", ""]
            );
            assert_eq!(format_document(&doc), input);
        }
    }
}

pub mod format {
    //! Serializer back to markdown text.
    //!
    //! Opaque lines are re-emitted verbatim in place. The only liberty taken
    //! is whitespace normalization: exactly one blank line is enforced before
    //! every `##` and `###` header, which makes serialize-then-parse stable
    //! from the first pass onward.

    use crate::core::*;

    pub fn format_document(doc: &Document) -> String {
        let mut out = String::new();
        for node in &doc.nodes {
            match node {
                TopNode::Opaque(line) => push_line(&mut out, line),
                TopNode::ProjectContext(cx) => {
                    ensure_gap(&mut out);
                    push_line(&mut out, &format!("## {PROJECT_CONTEXT_LABEL}"));
                    for line in &cx.lines {
                        push_line(&mut out, line);
                    }
                }
                TopNode::Date(section) => format_section_into(&mut out, section),
            }
        }
        out
    }

    /// Render a single date section, e.g. for a "today" view.
    pub fn format_section(section: &DateSection) -> String {
        let mut out = String::new();
        format_section_into(&mut out, section);
        out
    }

    fn format_section_into(out: &mut String, section: &DateSection) {
        ensure_gap(out);
        push_line(out, &format!("## {}", section.date));
        for node in &section.nodes {
            match node {
                DateNode::Opaque(line) => push_line(out, line),
                DateNode::User(sub) => {
                    ensure_gap(out);
                    push_line(out, &format!("### {}", sub.label()));
                    for sn in &sub.nodes {
                        match sn {
                            SubNode::Opaque(line) => push_line(out, line),
                            SubNode::Block(block) => {
                                push_line(out, &format!("#### {}", block.kind));
                                for entry in &block.entries {
                                    match entry {
                                        BlockEntry::Opaque(line) => push_line(out, line),
                                        BlockEntry::Item(item) => {
                                            push_line(out, &render_item(item))
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    pub(crate) fn render_item(item: &Item) -> String {
        let mut line = match item.checkbox {
            Some(true) => String::from("- [x] "),
            Some(false) => String::from("- [ ] "),
            None => String::from("- "),
        };
        line.push_str(&item.text);
        if let Some(provenance) = &item.provenance {
            line.push_str(&format!(" ({provenance})"));
        }
        line
    }

    fn push_line(out: &mut String, line: &str) {
        out.push_str(line);
        out.push('\n');
    }

    /// Normalize the tail of the buffer to exactly one blank line.
    fn ensure_gap(out: &mut String) {
        if out.is_empty() {
            return;
        }
        while out.ends_with("\n\n\n") {
            out.pop();
        }
        if !out.ends_with("\n\n") {
            out.push('\n');
        }
    }

}

pub mod editor {
    //! Section locator/builder and content mutators.
    //!
    //! Every operation takes the invoking context (date, handle, branch)
    //! explicitly; nothing here reads ambient state. Text-matching mutations
    //! scan strictly in document order and touch the first match only, so
    //! re-runs are reproducible. Validation happens before any mutation.

    use crate::core::*;

    /// Who is editing, and on which day. Supplied by the caller; the core
    /// never computes dates or shells out to git.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct EditContext {
        pub date: String,
        pub handle: String,
        pub branch: String,
    }

    impl EditContext {
        pub fn new(
            date: impl Into<String>,
            handle: impl Into<String>,
            branch: impl Into<String>,
        ) -> Self {
            Self {
                date: date.into(),
                handle: handle.into(),
                branch: branch.into(),
            }
        }
    }

    /// Find or build the block for (date, handle, branch, kind), creating
    /// missing ancestors. Idempotent: repeated calls with the same arguments
    /// return the same block.
    pub fn locate_or_create<'a>(
        doc: &'a mut Document,
        date: &str,
        handle: &str,
        branch: &str,
        kind: BlockType,
    ) -> Result<&'a mut Block, EditError> {
        if !valid_date(date) {
            return Err(EditError::InvalidDateFormat(date.to_string()));
        }
        Ok(doc
            .ensure_section(date)
            .ensure_subsection(handle, branch)
            .ensure_block(kind))
    }

    /// Append new content to the context's block of the given kind. Todo
    /// blocks get unchecked tasks; Notes and Ideas get plain bullets.
    pub fn insert(
        doc: &mut Document,
        ctx: &EditContext,
        kind: BlockType,
        content: &str,
    ) -> Result<(), EditError> {
        if !valid_date(&ctx.date) {
            return Err(EditError::InvalidDateFormat(ctx.date.clone()));
        }
        let content = content.trim();
        if content.is_empty() {
            return Err(EditError::EmptyContent);
        }
        let block = locate_or_create(doc, &ctx.date, &ctx.handle, &ctx.branch, kind)?;
        let item = match kind {
            // A literal `(carried from ...)` suffix is absorbed into the
            // provenance field, so the stored item matches what a re-parse of
            // the rendered line would produce.
            BlockType::Todo => {
                let (text, provenance) = crate::parser::split_provenance(content);
                Item {
                    text,
                    checkbox: Some(false),
                    provenance,
                }
            }
            BlockType::Notes | BlockType::Ideas => Item::bullet(content),
        };
        append_item(block, item);
        Ok(())
    }

    /// Flip the first un-done task containing `partial` (case-sensitive) to
    /// done. Exactly one item changes per call; already-done items are never
    /// eligible.
    pub fn mark_complete(doc: &mut Document, partial: &str) -> Result<(), EditError> {
        if partial.trim().is_empty() {
            return Err(EditError::EmptyContent);
        }
        let Some(path) = find_item(doc, |item| item.is_open_task() && item.text.contains(partial))
        else {
            return Err(EditError::TaskNotFound(partial.to_string()));
        };
        item_at_mut(doc, path).checkbox = Some(true);
        Ok(())
    }

    /// Remove the first item containing `partial`, whatever its block type or
    /// done state. Remaining items keep their order.
    pub fn delete(doc: &mut Document, partial: &str) -> Result<(), EditError> {
        if partial.trim().is_empty() {
            return Err(EditError::EmptyContent);
        }
        let Some(path) = find_item(doc, |item| item.text.contains(partial)) else {
            return Err(EditError::TaskNotFound(partial.to_string()));
        };
        remove_entry(doc, path);
        Ok(())
    }

    /// Move the first un-done task containing `partial` to the context's Todo
    /// block, stamping it `carried from <origin date>`. A same-day carry still
    /// removes and re-appends: position refreshes and provenance is rewritten.
    pub fn carry_forward(
        doc: &mut Document,
        ctx: &EditContext,
        partial: &str,
    ) -> Result<(), EditError> {
        if !valid_date(&ctx.date) {
            return Err(EditError::InvalidDateFormat(ctx.date.clone()));
        }
        if partial.trim().is_empty() {
            return Err(EditError::EmptyContent);
        }
        let Some(path) = find_item(doc, |item| item.is_open_task() && item.text.contains(partial))
        else {
            return Err(EditError::TaskNotFound(partial.to_string()));
        };
        let origin = match &doc.nodes[path.section] {
            TopNode::Date(section) => section.date.clone(),
            _ => unreachable!("path points at a date section"),
        };
        let BlockEntry::Item(item) = remove_entry(doc, path) else {
            unreachable!("path points at an item");
        };
        let block = locate_or_create(doc, &ctx.date, &ctx.handle, &ctx.branch, BlockType::Todo)?;
        append_item(
            block,
            Item {
                text: item.text,
                checkbox: Some(false),
                provenance: Some(format!("{CARRIED_FROM_PREFIX}{origin}")),
            },
        );
        Ok(())
    }

    /* ------------------------------ Internals ------------------------------ */

    /// Address of one entry: indices down the node tree, valid until the next
    /// structural mutation.
    #[derive(Debug, Clone, Copy)]
    struct ItemPath {
        section: usize,
        subsection: usize,
        block: usize,
        entry: usize,
    }

    /// First item satisfying `pred`, scanning date sections as stored, then
    /// subsections, then blocks, then entries.
    fn find_item(doc: &Document, pred: impl Fn(&Item) -> bool) -> Option<ItemPath> {
        for (si, node) in doc.nodes.iter().enumerate() {
            let TopNode::Date(section) = node else {
                continue;
            };
            for (ui, dn) in section.nodes.iter().enumerate() {
                let DateNode::User(sub) = dn else {
                    continue;
                };
                for (bi, sn) in sub.nodes.iter().enumerate() {
                    let SubNode::Block(block) = sn else {
                        continue;
                    };
                    for (ei, entry) in block.entries.iter().enumerate() {
                        if let BlockEntry::Item(item) = entry {
                            if pred(item) {
                                return Some(ItemPath {
                                    section: si,
                                    subsection: ui,
                                    block: bi,
                                    entry: ei,
                                });
                            }
                        }
                    }
                }
            }
        }
        None
    }

    fn block_at_mut(doc: &mut Document, path: ItemPath) -> &mut Block {
        doc.section_at_mut(path.section)
            .subsection_at_mut(path.subsection)
            .block_at_mut(path.block)
    }

    fn item_at_mut(doc: &mut Document, path: ItemPath) -> &mut Item {
        match &mut block_at_mut(doc, path).entries[path.entry] {
            BlockEntry::Item(item) => item,
            BlockEntry::Opaque(_) => unreachable!("path points at an item"),
        }
    }

    fn remove_entry(doc: &mut Document, path: ItemPath) -> BlockEntry {
        block_at_mut(doc, path).entries.remove(path.entry)
    }

    /// New items land after the block's last substantive entry, leaving any
    /// trailing blank run where it was.
    fn append_item(block: &mut Block, item: Item) {
        let pos = block
            .entries
            .iter()
            .rposition(|e| match e {
                BlockEntry::Item(_) => true,
                BlockEntry::Opaque(line) => !line.trim().is_empty(),
            })
            .map(|i| i + 1)
            .unwrap_or(0);
        block.entries.insert(pos, BlockEntry::Item(item));
    }

}

pub mod search {
    //! Case-insensitive substring search over every item, in document order.

    use serde::Serialize;

    use crate::core::*;

    /// One match, with enough context to display or act on it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    pub struct SearchHit<'a> {
        pub date: &'a str,
        pub handle: &'a str,
        pub branch: &'a str,
        pub block: BlockType,
        pub text: &'a str,
    }

    /// A validated query bound to a document. `iter` can be called any number
    /// of times; each call restarts the lazy scan.
    pub struct Search<'a> {
        doc: &'a Document,
        needle: String,
    }

    impl<'a> Search<'a> {
        pub fn new(doc: &'a Document, query: &str) -> Result<Self, EditError> {
            if query.trim().is_empty() {
                return Err(EditError::EmptyContent);
            }
            Ok(Self {
                doc,
                needle: query.to_lowercase(),
            })
        }

        pub fn iter(&self) -> impl Iterator<Item = SearchHit<'a>> + '_ {
            let needle = self.needle.as_str();
            items_in_order(self.doc).filter(move |hit| hit.text.to_lowercase().contains(needle))
        }
    }

    /// Every item in the document, flattened in strict document order.
    pub(crate) fn items_in_order(doc: &Document) -> impl Iterator<Item = SearchHit<'_>> {
        doc.nodes
            .iter()
            .filter_map(|n| match n {
                TopNode::Date(s) => Some(s),
                _ => None,
            })
            .flat_map(|section| {
                section
                    .nodes
                    .iter()
                    .filter_map(|n| match n {
                        DateNode::User(u) => Some(u),
                        DateNode::Opaque(_) => None,
                    })
                    .flat_map(move |sub| {
                        sub.nodes
                            .iter()
                            .filter_map(|n| match n {
                                SubNode::Block(b) => Some(b),
                                SubNode::Opaque(_) => None,
                            })
                            .flat_map(move |block| {
                                block.entries.iter().filter_map(move |entry| match entry {
                                    BlockEntry::Item(item) => Some(SearchHit {
                                        date: section.date.as_str(),
                                        handle: sub.handle.as_str(),
                                        branch: sub.branch.as_str(),
                                        block: block.kind,
                                        text: item.text.as_str(),
                                    }),
                                    BlockEntry::Opaque(_) => None,
                                })
                            })
                    })
            })
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::editor::{EditContext, insert};
        use crate::parser::parse_document;

        const INPUT: &str = "\
# Dev Notes

## 2025-10-20

### alice (@alice)
#### Todo
- [ ] Fix authentication bug
- [ ] Update documentation

## 2025-10-23

### bob-hotfix (@bob)
#### Notes
- Working on email service debugging
#### Ideas
- Consider redis caching
";

        #[test]
        fn hits_carry_full_context_in_document_order() {
            let doc = parse_document(INPUT);
            let search = Search::new(&doc, "e").expect("query");
            let hits: Vec<_> = search.iter().collect();
            assert_eq!(hits.len(), 4);
            assert_eq!(hits[0].date, "2025-10-20");
            assert_eq!(hits[0].handle, "alice");
            assert_eq!(hits[0].branch, "");
            assert_eq!(hits[0].block, BlockType::Todo);
            assert_eq!(hits[3].date, "2025-10-23");
            assert_eq!(hits[3].branch, "hotfix");
            assert_eq!(hits[3].block, BlockType::Ideas);
        }

        #[test]
        fn query_matching_is_case_insensitive() {
            let doc = parse_document(INPUT);
            let search = Search::new(&doc, "REDIS").expect("query");
            let hits: Vec<_> = search.iter().collect();
            assert_eq!(hits.len(), 1);
            assert_eq!(hits[0].text, "Consider redis caching");
        }

        #[test]
        fn insert_then_search_unique_substring_finds_exactly_one() {
            let mut doc = parse_document(INPUT);
            insert(
                &mut doc,
                &EditContext::new("2025-10-24", "carol", "wip"),
                BlockType::Ideas,
                "Switch to zstd compression",
            )
            .expect("insert");
            let search = Search::new(&doc, "zstd").expect("query");
            let hits: Vec<_> = search.iter().collect();
            assert_eq!(hits.len(), 1);
            assert_eq!(hits[0].date, "2025-10-24");
            assert_eq!(hits[0].handle, "carol");
            assert_eq!(hits[0].branch, "wip");
            assert_eq!(hits[0].block, BlockType::Ideas);
        }

        #[test]
        fn empty_query_is_rejected() {
            let doc = parse_document(INPUT);
            assert!(matches!(
                Search::new(&doc, "   "),
                Err(EditError::EmptyContent)
            ));
        }

        #[test]
        fn no_match_is_an_empty_sequence_not_an_error() {
            let doc = parse_document(INPUT);
            let search = Search::new(&doc, "kubernetes").expect("query");
            assert_eq!(search.iter().count(), 0);
        }

        #[test]
        fn iteration_is_restartable() {
            let doc = parse_document(INPUT);
            let search = Search::new(&doc, "bug").expect("query");
            let first: Vec<_> = search.iter().collect();
            let second: Vec<_> = search.iter().collect();
            assert_eq!(first, second);
        }
    }
}

pub mod migrate {
    //! Legacy-format migration.
    //!
    //! Early scratchpads used flat `## DATE (@handle)` sections with block
    //! labels one level up (`### Todo`). Migration re-nests that content under
    //! the current date, user, block hierarchy: one subsection per legacy
    //! header, same-date headers merged in appearance order, every item and
    //! opaque line preserved. Running it on an already-migrated or mixed file
    //! changes nothing beyond whitespace normalization.

    use crate::core::Document;
    use crate::format::format_document;
    use crate::parser::parse_with;

    /// Parse `text` with the legacy grammar enabled, producing a document in
    /// the current shape.
    pub fn migrate_document(text: &str) -> Document {
        parse_with(text, true)
    }

    /// Convenience wrapper: migrated text, ready to write back.
    pub fn migrate(text: &str) -> String {
        format_document(&migrate_document(text))
    }

}

pub use crate::core::{Block, BlockType, DateSection, Document, EditError, Item, UserSubsection};
pub use crate::editor::{
    EditContext, carry_forward, delete, insert, locate_or_create, mark_complete,
};
pub use crate::format::{format_document, format_section};
pub use crate::migrate::migrate;
pub use crate::parser::{classify, parse_document};
pub use crate::search::{Search, SearchHit};
