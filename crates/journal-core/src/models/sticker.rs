//! Sticker model and anchor resolution

use serde::{Deserialize, Serialize};

use super::Content;

/// Relative placement of a sticker.
///
/// `block_id` is a weak reference: it names a content block but does not own
/// it. `None` anchors to the viewport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StickerAnchor {
    #[serde(default)]
    pub block_id: Option<String>,
    pub bias_x: f64,
    pub bias_y: f64,
}

impl StickerAnchor {
    /// Centered viewport anchor used when a referenced block is gone.
    #[must_use]
    pub const fn viewport_default() -> Self {
        Self {
            block_id: None,
            bias_x: 0.5,
            bias_y: 0.5,
        }
    }
}

/// A sticker placed on a note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sticker {
    pub id: String,
    pub type_id: i64,
    pub scale: f64,
    pub rotation: f64,
    pub flip: bool,
    pub anchors: Vec<StickerAnchor>,
    /// Last edit (Unix ms)
    pub edit_time: i64,
}

/// What an anchor resolved to against the current content.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnchorTarget<'a> {
    Block(&'a Content),
    Viewport,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedAnchor<'a> {
    pub target: AnchorTarget<'a>,
    pub bias_x: f64,
    pub bias_y: f64,
}

impl Sticker {
    /// Resolve every anchor against `content`.
    ///
    /// Anchors naming a block that no longer exists fall back to
    /// [`StickerAnchor::viewport_default`].
    #[must_use]
    pub fn resolve_anchors<'a>(&self, content: &'a [Content]) -> Vec<ResolvedAnchor<'a>> {
        self.anchors
            .iter()
            .map(|anchor| {
                let Some(block_id) = anchor.block_id.as_deref() else {
                    return ResolvedAnchor {
                        target: AnchorTarget::Viewport,
                        bias_x: anchor.bias_x,
                        bias_y: anchor.bias_y,
                    };
                };

                match content.iter().find(|block| block.id() == block_id) {
                    Some(block) => ResolvedAnchor {
                        target: AnchorTarget::Block(block),
                        bias_x: anchor.bias_x,
                        bias_y: anchor.bias_y,
                    },
                    None => {
                        let fallback = StickerAnchor::viewport_default();
                        ResolvedAnchor {
                            target: AnchorTarget::Viewport,
                            bias_x: fallback.bias_x,
                            bias_y: fallback.bias_y,
                        }
                    }
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sticker(anchors: Vec<StickerAnchor>) -> Sticker {
        Sticker {
            id: "s1".to_string(),
            type_id: 3,
            scale: 1.0,
            rotation: 0.0,
            flip: false,
            anchors,
            edit_time: 0,
        }
    }

    #[test]
    fn anchors_resolve_to_existing_blocks() {
        let content = vec![Content::Title {
            id: "t1".to_string(),
            text: "hi".to_string(),
        }];
        let sticker = sticker(vec![StickerAnchor {
            block_id: Some("t1".to_string()),
            bias_x: 0.1,
            bias_y: 0.9,
        }]);

        let resolved = sticker.resolve_anchors(&content);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].target, AnchorTarget::Block(&content[0]));
        assert!((resolved[0].bias_x - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_block_falls_back_to_viewport() {
        let sticker = sticker(vec![StickerAnchor {
            block_id: Some("deleted".to_string()),
            bias_x: 0.1,
            bias_y: 0.9,
        }]);

        let resolved = sticker.resolve_anchors(&[]);
        assert_eq!(resolved[0].target, AnchorTarget::Viewport);
        assert!((resolved[0].bias_x - 0.5).abs() < f64::EPSILON);
        assert!((resolved[0].bias_y - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn viewport_anchor_keeps_its_bias() {
        let sticker = sticker(vec![StickerAnchor {
            block_id: None,
            bias_x: 0.2,
            bias_y: 0.3,
        }]);

        let resolved = sticker.resolve_anchors(&[]);
        assert_eq!(resolved[0].target, AnchorTarget::Viewport);
        assert!((resolved[0].bias_y - 0.3).abs() < f64::EPSILON);
    }
}
