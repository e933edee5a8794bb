//! Capability-surface types shared by the client and server faces: the eight operations named
//! in §4.9 (Initialize/Shutdown/GoToDefinition/FindReferences/Hover/Symbols/Format/Rename/
//! CodeActions/ApplyEdit).

use serde::{Deserialize, Serialize};

pub mod method {
    pub const INITIALIZE: &str = "initialize";
    pub const SHUTDOWN: &str = "shutdown";
    pub const DEFINITION: &str = "textDocument/definition";
    pub const REFERENCES: &str = "textDocument/references";
    pub const HOVER: &str = "textDocument/hover";
    pub const SYMBOLS: &str = "textDocument/documentSymbol";
    pub const FORMATTING: &str = "textDocument/formatting";
    pub const RENAME: &str = "textDocument/rename";
    pub const CODE_ACTION: &str = "textDocument/codeAction";
    pub const APPLY_EDIT: &str = "workspace/applyEdit";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextDocumentIdentifier {
    pub uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextDocumentPositionParams {
    pub text_document: TextDocumentIdentifier,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub uri: String,
    pub range: Range,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceParams {
    #[serde(flatten)]
    pub position: TextDocumentPositionParams,
    pub include_declaration: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hover {
    pub contents: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInformation {
    pub name: String,
    pub kind: u32,
    pub location: Location,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
}

/// A single replacement: `range` in the original document's line/column space is replaced by
/// `new_text`. Multiple edits against the same document are applied bottom-to-top (§4.9) so
/// earlier replacements never invalidate the positions of later ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextEdit {
    pub range: Range,
    pub new_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameParams {
    #[serde(flatten)]
    pub position: TextDocumentPositionParams,
    pub new_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeActionParams {
    pub text_document: TextDocumentIdentifier,
    pub range: Range,
    #[serde(default)]
    pub diagnostics: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeAction {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edit: Option<WorkspaceEdit>,
}

/// `uri -> edits`, matching the shape a real language server returns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceEdit {
    pub changes: std::collections::HashMap<String, Vec<TextEdit>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyWorkspaceEditParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub edit: WorkspaceEdit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyWorkspaceEditResult {
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// Applies `edits` to `text`, bottom-to-top by `(line, character)` descending, so each
/// replacement's byte offset is computed against still-unmodified text above and below it
/// (§4.9: "document edits are applied from bottom to top to preserve positions").
pub fn apply_edits(text: &str, edits: &[TextEdit]) -> String {
    let mut lines: Vec<String> = text.split('\n').map(|l| l.to_string()).collect();
    let mut ordered: Vec<&TextEdit> = edits.iter().collect();
    ordered.sort_by(|a, b| {
        (b.range.start.line, b.range.start.character).cmp(&(a.range.start.line, a.range.start.character))
    });

    for edit in ordered {
        let start = edit.range.start;
        let end = edit.range.end;
        if start.line as usize >= lines.len() || end.line as usize >= lines.len() {
            continue;
        }
        if start.line == end.line {
            let line = &mut lines[start.line as usize];
            let s = char_index_to_byte(line, start.character as usize);
            let e = char_index_to_byte(line, end.character as usize);
            line.replace_range(s..e, &edit.new_text);
        } else {
            let start_line = &lines[start.line as usize];
            let end_line = &lines[end.line as usize];
            let prefix = &start_line[..char_index_to_byte(start_line, start.character as usize)];
            let suffix = &end_line[char_index_to_byte(end_line, end.character as usize)..];
            let replacement = format!("{}{}{}", prefix, edit.new_text, suffix);
            lines.splice(start.line as usize..=end.line as usize, [replacement]);
        }
    }

    lines.join("\n")
}

fn char_index_to_byte(s: &str, char_idx: usize) -> usize {
    s.char_indices().nth(char_idx).map(|(b, _)| b).unwrap_or(s.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(line: u32, character: u32) -> Position {
        Position { line, character }
    }

    #[test]
    fn applies_multiple_edits_bottom_to_top() {
        let text = "hello world\nsecond line\n";
        let edits = vec![
            TextEdit { range: Range { start: pos(0, 0), end: pos(0, 5) }, new_text: "bye".into() },
            TextEdit { range: Range { start: pos(1, 0), end: pos(1, 6) }, new_text: "2nd".into() },
        ];
        let result = apply_edits(text, &edits);
        assert_eq!(result, "bye world\n2nd line\n");
    }

    #[test]
    fn single_edit_replaces_range() {
        let text = "abcdef";
        let edits = vec![TextEdit { range: Range { start: pos(0, 1), end: pos(0, 3) }, new_text: "XY".into() }];
        assert_eq!(apply_edits(text, &edits), "aXYdef");
    }
}
