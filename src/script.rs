use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// A pointer to an image or video shown alongside a scripted turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub src: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl MediaRef {
    pub fn caption(&self) -> Option<&str> {
        self.alt.as_deref().or(self.title.as_deref())
    }
}

/// One pre-authored unit of AI-side content. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptedTurn {
    pub id: String,
    pub html: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<MediaRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<MediaRef>,
}

impl ScriptedTurn {
    /// The media descriptor for this turn; image wins when both are set.
    pub fn media(&self) -> Option<&MediaRef> {
        self.image.as_ref().or(self.video.as_ref())
    }
}

/// The fixed ordered turn sequence. Consumed by index only.
#[derive(Debug, Clone)]
pub struct Script {
    turns: Vec<ScriptedTurn>,
}

impl Script {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self { turns }
    }

    /// The script compiled into the binary, used when no script file is
    /// present or the file fails to load.
    pub fn builtin() -> Self {
        Self::from_json_str(include_str!("script.json"))
            .expect("built-in script should be valid JSON")
    }

    pub fn from_json_str(raw: &str) -> Result<Self, String> {
        let turns: Vec<ScriptedTurn> =
            serde_json::from_str(raw).map_err(|err| format!("failed to parse script: {err}"))?;
        Ok(Self { turns })
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let raw = fs::read_to_string(path)
            .map_err(|err| format!("failed to read {}: {err}", path.display()))?;
        Self::from_json_str(&raw)
            .map_err(|err| format!("{}: {err}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turn(&self, cursor: usize) -> Option<&ScriptedTurn> {
        self.turns.get(cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_script_parses_and_carries_media() {
        let script = Script::builtin();
        assert_eq!(script.len(), 10);
        assert!(script.turn(3).and_then(|turn| turn.image.as_ref()).is_some());
        assert!(script.turn(5).and_then(|turn| turn.video.as_ref()).is_some());
        assert!(script.turn(0).and_then(ScriptedTurn::media).is_none());
    }

    #[test]
    fn image_takes_precedence_over_video() {
        let turn = ScriptedTurn {
            id: "t".to_string(),
            html: "<p>x</p>".to_string(),
            image: Some(MediaRef {
                src: "https://a/img.png".to_string(),
                alt: Some("img".to_string()),
                title: None,
            }),
            video: Some(MediaRef {
                src: "https://a/clip.mp4".to_string(),
                alt: None,
                title: Some("clip".to_string()),
            }),
        };
        assert_eq!(turn.media().map(|m| m.src.as_str()), Some("https://a/img.png"));
    }

    #[test]
    fn rejects_malformed_script_json() {
        assert!(Script::from_json_str("{not json").is_err());
        assert!(Script::from_json_str("[{\"id\":\"a\"}]").is_err());
    }

    #[test]
    fn media_caption_prefers_alt() {
        let media = MediaRef {
            src: "https://a/x".to_string(),
            alt: Some("alt text".to_string()),
            title: Some("title text".to_string()),
        };
        assert_eq!(media.caption(), Some("alt text"));
    }
}
