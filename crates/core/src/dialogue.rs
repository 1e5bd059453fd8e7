//! Speaker-tagged transcript parsing.
//!
//! A dialogue line is `<speaker><sep><utterance>` where `<sep>` is an ASCII
//! colon or a full-width `：`. Matching runs over the whole document: the
//! speaker side is any run of non-colon characters, so stray text before a
//! tag folds into the speaker and is cut back by trimming; the utterance ends
//! at the next newline.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;

static DIALOGUE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([^：:]+)[：:]([^\n]+)").expect("dialogue pattern is a valid regex")
});

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DialogueLine {
    /// Rank among the parsed lines, starting at 0.
    pub index: usize,
    pub speaker: String,
    pub text: String,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("no speaker-tagged dialogue lines found")]
    NoDialoguesFound,
}

pub fn extract_dialogues(content: &str) -> Result<Vec<DialogueLine>, ParseError> {
    let lines: Vec<DialogueLine> = DIALOGUE_PATTERN
        .captures_iter(content)
        .filter_map(|caps| {
            let speaker = caps.get(1)?.as_str().trim();
            let text = caps.get(2)?.as_str().trim();
            (!speaker.is_empty() && !text.is_empty()).then(|| (speaker, text))
        })
        .enumerate()
        .map(|(index, (speaker, text))| DialogueLine {
            index,
            speaker: speaker.to_owned(),
            text: text.to_owned(),
        })
        .collect();

    if lines.is_empty() {
        return Err(ParseError::NoDialoguesFound);
    }
    tracing::debug!(count = lines.len(), "extracted dialogue lines");
    Ok(lines)
}

/// Speakers in order of first appearance.
pub fn distinct_speakers(lines: &[DialogueLine]) -> Vec<&str> {
    let mut seen = HashSet::new();
    lines
        .iter()
        .map(|line| line.speaker.as_str())
        .filter(|speaker| seen.insert(*speaker))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(lines: &[DialogueLine]) -> Vec<(usize, &str, &str)> {
        lines
            .iter()
            .map(|l| (l.index, l.speaker.as_str(), l.text.as_str()))
            .collect()
    }

    #[test]
    fn parses_full_width_and_ascii_separators() {
        let lines = extract_dialogues("主持人：大家好\n嘉宾A：你好\nHost: welcome back").unwrap();
        assert_eq!(
            pairs(&lines),
            vec![
                (0, "主持人", "大家好"),
                (1, "嘉宾A", "你好"),
                (2, "Host", "welcome back"),
            ]
        );
    }

    #[test]
    fn trims_speaker_and_text() {
        let lines = extract_dialogues("  主持人 ：  欢迎收听  \r\n").unwrap();
        assert_eq!(pairs(&lines), vec![(0, "主持人", "欢迎收听")]);
    }

    #[test]
    fn empty_utterance_is_dropped_and_indices_stay_dense() {
        let lines = extract_dialogues("A：\nB：   \nC：第三句\nD：第四句").unwrap();
        assert_eq!(pairs(&lines), vec![(0, "C", "第三句"), (1, "D", "第四句")]);
    }

    #[test]
    fn blank_lines_between_dialogue_are_ignored() {
        let lines = extract_dialogues("A：one\n\n\nB：two\n").unwrap();
        assert_eq!(pairs(&lines), vec![(0, "A", "one"), (1, "B", "two")]);
    }

    #[test]
    fn utterance_may_contain_further_colons() {
        let lines = extract_dialogues("A：时间是 10:30：准时开始").unwrap();
        assert_eq!(pairs(&lines), vec![(0, "A", "时间是 10:30：准时开始")]);
    }

    #[test]
    fn recurring_speakers_are_kept_in_order() {
        let text = "A：1\nB：2\nA：3\nC：4\nA：5";
        let lines = extract_dialogues(text).unwrap();
        assert_eq!(lines.len(), 5);
        assert!(lines.iter().enumerate().all(|(i, l)| l.index == i));
        assert_eq!(distinct_speakers(&lines), vec!["A", "B", "C"]);
    }

    #[test]
    fn no_dialogue_is_an_error() {
        assert_eq!(
            extract_dialogues("just prose\nwithout any tags\n"),
            Err(ParseError::NoDialoguesFound)
        );
        assert_eq!(extract_dialogues(""), Err(ParseError::NoDialoguesFound));
    }

    #[test]
    fn untagged_prose_before_a_tag_folds_into_the_speaker() {
        let lines = extract_dialogues("标题\n主持人：开场").unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].speaker, "标题\n主持人");
        assert_eq!(lines[0].text, "开场");
    }
}
