//! Timeline element model.
//!
//! Scripts do not draw; they *declare* elements, which are captured into the
//! storyboard document in emission order and consumed later by the renderer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ElementError;

/// Render layer of a storyboard element.
///
/// The set is closed and totally ordered: `Background` renders first and
/// `Video` last. Derived `Ord` follows declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Background,
    Fail,
    Pass,
    Foreground,
    Overlay,
    Video,
}

impl Layer {
    /// All layers in render order.
    pub const ALL: [Layer; 6] = [
        Layer::Background,
        Layer::Fail,
        Layer::Pass,
        Layer::Foreground,
        Layer::Overlay,
        Layer::Video,
    ];

    /// Canonical name, as exposed to scripts through the `Layer` namespace.
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Background => "Background",
            Layer::Fail => "Fail",
            Layer::Pass => "Pass",
            Layer::Foreground => "Foreground",
            Layer::Overlay => "Overlay",
            Layer::Video => "Video",
        }
    }
}

impl FromStr for Layer {
    type Err = ElementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Layer::ALL
            .iter()
            .find(|layer| layer.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| ElementError::UnknownLayer(s.to_string()))
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anchor point of a visual element, relative to its own bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    TopLeft,
    TopCentre,
    TopRight,
    CentreLeft,
    #[default]
    Centre,
    CentreRight,
    BottomLeft,
    BottomCentre,
    BottomRight,
}

impl Origin {
    pub const ALL: [Origin; 9] = [
        Origin::TopLeft,
        Origin::TopCentre,
        Origin::TopRight,
        Origin::CentreLeft,
        Origin::Centre,
        Origin::CentreRight,
        Origin::BottomLeft,
        Origin::BottomCentre,
        Origin::BottomRight,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::TopLeft => "TopLeft",
            Origin::TopCentre => "TopCentre",
            Origin::TopRight => "TopRight",
            Origin::CentreLeft => "CentreLeft",
            Origin::Centre => "Centre",
            Origin::CentreRight => "CentreRight",
            Origin::BottomLeft => "BottomLeft",
            Origin::BottomCentre => "BottomCentre",
            Origin::BottomRight => "BottomRight",
        }
    }
}

impl FromStr for Origin {
    type Err = ElementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Origin::ALL
            .iter()
            .find(|origin| origin.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| ElementError::UnknownOrigin(s.to_string()))
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Playback mode of an animation's frame cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopKind {
    #[default]
    Forever,
    Once,
}

impl LoopKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopKind::Forever => "Forever",
            LoopKind::Once => "Once",
        }
    }
}

impl FromStr for LoopKind {
    type Err = ElementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            _ if s.eq_ignore_ascii_case("Forever") => Ok(LoopKind::Forever),
            _ if s.eq_ignore_ascii_case("Once") => Ok(LoopKind::Once),
            _ => Err(ElementError::UnknownLoopKind(s.to_string())),
        }
    }
}

impl fmt::Display for LoopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific payload of a declared element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementKind {
    /// A static image.
    Sprite {
        path: String,
        origin: Origin,
        x: f64,
        y: f64,
    },
    /// A frame-cycled image sequence. `path` names the frame template.
    Animation {
        path: String,
        origin: Origin,
        x: f64,
        y: f64,
        frame_count: u32,
        /// Delay between frames, in milliseconds.
        frame_delay: f64,
        loop_kind: LoopKind,
    },
    /// An audio sample triggered at its start time.
    Sample { path: String, volume: f64 },
    /// A background video. Always lands on [`Layer::Video`].
    Video { path: String, x: f64, y: f64 },
}

impl ElementKind {
    pub fn name(&self) -> &'static str {
        match self {
            ElementKind::Sprite { .. } => "sprite",
            ElementKind::Animation { .. } => "animation",
            ElementKind::Sample { .. } => "sample",
            ElementKind::Video { .. } => "video",
        }
    }

    /// Asset path referenced by the element.
    pub fn path(&self) -> &str {
        match self {
            ElementKind::Sprite { path, .. }
            | ElementKind::Animation { path, .. }
            | ElementKind::Sample { path, .. }
            | ElementKind::Video { path, .. } => path,
        }
    }
}

/// A single captured timeline object.
///
/// Construction validates the fields a renderer cannot recover from: the
/// start time must be finite and non-negative, the asset path non-empty and
/// animation parameters sane. Everything else is taken as declared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptedElement {
    /// Name of the script that declared this element. Diagnostic only; it
    /// plays no role in ordering or grouping.
    pub script: String,
    pub layer: Layer,
    pub group: String,
    /// Timeline position in milliseconds.
    pub start_time: f64,
    pub kind: ElementKind,
}

impl ScriptedElement {
    pub fn new(
        script: impl Into<String>,
        layer: Layer,
        group: impl Into<String>,
        start_time: f64,
        kind: ElementKind,
    ) -> Result<Self, ElementError> {
        if !start_time.is_finite() || start_time < 0.0 {
            return Err(ElementError::InvalidStartTime(start_time));
        }
        if kind.path().is_empty() {
            return Err(ElementError::EmptyPath);
        }
        if let ElementKind::Animation {
            frame_count,
            frame_delay,
            ..
        } = &kind
        {
            if *frame_count == 0 {
                return Err(ElementError::InvalidFrameCount(0));
            }
            if !frame_delay.is_finite() || *frame_delay < 0.0 {
                return Err(ElementError::InvalidFrameDelay(*frame_delay));
            }
        }
        Ok(ScriptedElement {
            script: script.into(),
            layer,
            group: group.into(),
            start_time,
            kind,
        })
    }
}
