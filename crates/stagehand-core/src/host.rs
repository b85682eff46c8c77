//! The standard storyboard API exposed to every script.
//!
//! One [`BindingTable`] is built per runtime and applied to each script at
//! load time, so every language sees the same surface: the `Layer`, `Origin`
//! and `Loop` constant namespaces, the host metadata fields, and the element
//! declaration functions.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::bindings::{BindingTable, ScriptValue, TypeDescriptor};
use crate::document::{SharedStoryboard, Storyboard};
use crate::element::{ElementKind, Layer, LoopKind, Origin, ScriptedElement};
use crate::errors::{HostError, ScriptError};

/// Host-side configuration of the standard API.
#[derive(Debug, Clone, Default)]
pub struct HostConfig {
    /// Root directory `asset_path` resolves names against.
    pub asset_root: PathBuf,
    /// Extra values exposed to scripts as fields, in the order given.
    pub metadata: Vec<(String, ScriptValue)>,
}

/// Shared state behind the host functions: the capture document plus the
/// identity of the script currently performing.
///
/// The context is cloned into each host closure; all clones observe the same
/// document. `reset` / `take_document` bracket one run pass.
#[derive(Clone, Default)]
pub struct HostContext {
    document: SharedStoryboard,
    current_script: Arc<Mutex<String>>,
}

impl HostContext {
    pub fn new() -> Self {
        HostContext::default()
    }

    /// Shared handle to the document being filled.
    pub fn document(&self) -> SharedStoryboard {
        Arc::clone(&self.document)
    }

    /// Discards any previous contents. Called at the start of a pass.
    pub fn reset(&self) {
        *self.document.lock().unwrap() = Storyboard::new();
    }

    /// Takes the filled document out, leaving an empty one behind.
    pub fn take_document(&self) -> Storyboard {
        std::mem::take(&mut *self.document.lock().unwrap())
    }

    /// Sets the script name new elements are attributed to.
    pub fn set_current_script(&self, name: &str) {
        *self.current_script.lock().unwrap() = name.to_string();
    }

    fn current_script(&self) -> String {
        self.current_script.lock().unwrap().clone()
    }

    fn ensure_group(&self, layer: Layer, name: &str) {
        self.document.lock().unwrap().get_group(layer, name);
    }

    fn append(
        &self,
        layer: Layer,
        group: &str,
        start_time: f64,
        kind: ElementKind,
    ) -> Result<(), HostError> {
        let element = ScriptedElement::new(self.current_script(), layer, group, start_time, kind)?;
        debug!(
            script = element.script.as_str(),
            kind = element.kind.name(),
            layer = %layer,
            group,
            "captured element"
        );
        self.document.lock().unwrap().append(element);
        Ok(())
    }
}

/// Installs the standard surface into `table`.
///
/// Order matters and is fixed: constant namespaces, then metadata fields,
/// then functions. Fails if a metadata name collides with anything.
pub fn register_storyboard_api(
    table: &mut BindingTable,
    context: &HostContext,
    config: &HostConfig,
) -> Result<(), ScriptError> {
    table.register_type(layer_descriptor())?;
    table.register_type(origin_descriptor())?;
    table.register_type(loop_descriptor())?;

    for (name, value) in &config.metadata {
        table.register_field(name, value.clone())?;
    }

    let ctx = context.clone();
    table.register_method("get_group", 2, move |args| {
        let layer = layer_arg("get_group", args, 0)?;
        let name = str_arg("get_group", args, 1)?;
        ctx.ensure_group(layer, name);
        Ok(ScriptValue::Str(name.to_string()))
    })?;

    let ctx = context.clone();
    table.register_method("create_sprite", 7, move |args| {
        const NAME: &str = "create_sprite";
        let path = str_arg(NAME, args, 0)?;
        let layer = layer_arg(NAME, args, 1)?;
        let group = str_arg(NAME, args, 2)?;
        let origin = origin_arg(NAME, args, 3)?;
        let time = f64_arg(NAME, args, 4)?;
        let x = f64_arg(NAME, args, 5)?;
        let y = f64_arg(NAME, args, 6)?;
        let kind = ElementKind::Sprite {
            path: path.to_string(),
            origin,
            x,
            y,
        };
        ctx.append(layer, group, time, kind)?;
        Ok(ScriptValue::Unit)
    })?;

    let ctx = context.clone();
    table.register_method("create_animation", 10, move |args| {
        const NAME: &str = "create_animation";
        let path = str_arg(NAME, args, 0)?;
        let layer = layer_arg(NAME, args, 1)?;
        let group = str_arg(NAME, args, 2)?;
        let origin = origin_arg(NAME, args, 3)?;
        let time = f64_arg(NAME, args, 4)?;
        let x = f64_arg(NAME, args, 5)?;
        let y = f64_arg(NAME, args, 6)?;
        let frame_count = frame_count_arg(NAME, args, 7)?;
        let frame_delay = f64_arg(NAME, args, 8)?;
        let loop_kind = loop_arg(NAME, args, 9)?;
        let kind = ElementKind::Animation {
            path: path.to_string(),
            origin,
            x,
            y,
            frame_count,
            frame_delay,
            loop_kind,
        };
        ctx.append(layer, group, time, kind)?;
        Ok(ScriptValue::Unit)
    })?;

    let ctx = context.clone();
    table.register_method("create_sample", 5, move |args| {
        const NAME: &str = "create_sample";
        let path = str_arg(NAME, args, 0)?;
        let layer = layer_arg(NAME, args, 1)?;
        let group = str_arg(NAME, args, 2)?;
        let time = f64_arg(NAME, args, 3)?;
        let volume = f64_arg(NAME, args, 4)?;
        let kind = ElementKind::Sample {
            path: path.to_string(),
            volume,
        };
        ctx.append(layer, group, time, kind)?;
        Ok(ScriptValue::Unit)
    })?;

    // Videos are special-cased onto the video layer, one well-known group.
    let ctx = context.clone();
    table.register_method("create_video", 4, move |args| {
        const NAME: &str = "create_video";
        let path = str_arg(NAME, args, 0)?;
        let time = f64_arg(NAME, args, 1)?;
        let x = f64_arg(NAME, args, 2)?;
        let y = f64_arg(NAME, args, 3)?;
        let kind = ElementKind::Video {
            path: path.to_string(),
            x,
            y,
        };
        ctx.append(Layer::Video, "Video", time, kind)?;
        Ok(ScriptValue::Unit)
    })?;

    let root = config.asset_root.clone();
    table.register_method("asset_path", 1, move |args| {
        let name = str_arg("asset_path", args, 0)?;
        let joined = root.join(name);
        Ok(ScriptValue::Str(joined.to_string_lossy().into_owned()))
    })?;

    let ctx = context.clone();
    table.register_method("log", 1, move |args| {
        let message = value_arg("log", args, 0)?;
        let script = ctx.current_script();
        info!(script = script.as_str(), "{message}");
        Ok(ScriptValue::Unit)
    })?;

    Ok(())
}

fn layer_descriptor() -> TypeDescriptor {
    Layer::ALL
        .iter()
        .fold(TypeDescriptor::new("Layer"), |descriptor, layer| {
            descriptor.constant(layer.as_str(), layer.as_str())
        })
}

fn origin_descriptor() -> TypeDescriptor {
    Origin::ALL
        .iter()
        .fold(TypeDescriptor::new("Origin"), |descriptor, origin| {
            descriptor.constant(origin.as_str(), origin.as_str())
        })
}

fn loop_descriptor() -> TypeDescriptor {
    TypeDescriptor::new("Loop")
        .constant(LoopKind::Forever.as_str(), LoopKind::Forever.as_str())
        .constant(LoopKind::Once.as_str(), LoopKind::Once.as_str())
}

fn value_arg<'a>(
    name: &str,
    args: &'a [ScriptValue],
    index: usize,
) -> Result<&'a ScriptValue, HostError> {
    args.get(index).ok_or_else(|| HostError::Arity {
        name: name.to_string(),
        expected: index + 1,
        got: args.len(),
    })
}

fn argument_error(name: &str, index: usize, expected: &'static str, got: &ScriptValue) -> HostError {
    HostError::Argument {
        name: name.to_string(),
        index,
        expected,
        got: got.type_name().to_string(),
    }
}

fn str_arg<'a>(name: &str, args: &'a [ScriptValue], index: usize) -> Result<&'a str, HostError> {
    let value = value_arg(name, args, index)?;
    value
        .as_str()
        .ok_or_else(|| argument_error(name, index, "a string", value))
}

fn f64_arg(name: &str, args: &[ScriptValue], index: usize) -> Result<f64, HostError> {
    let value = value_arg(name, args, index)?;
    value
        .as_f64()
        .ok_or_else(|| argument_error(name, index, "a number", value))
}

fn layer_arg(name: &str, args: &[ScriptValue], index: usize) -> Result<Layer, HostError> {
    Ok(str_arg(name, args, index)?.parse::<Layer>()?)
}

fn origin_arg(name: &str, args: &[ScriptValue], index: usize) -> Result<Origin, HostError> {
    Ok(str_arg(name, args, index)?.parse::<Origin>()?)
}

fn loop_arg(name: &str, args: &[ScriptValue], index: usize) -> Result<LoopKind, HostError> {
    Ok(str_arg(name, args, index)?.parse::<LoopKind>()?)
}

fn frame_count_arg(name: &str, args: &[ScriptValue], index: usize) -> Result<u32, HostError> {
    let value = value_arg(name, args, index)?;
    let count = value
        .as_i64()
        .ok_or_else(|| argument_error(name, index, "an integer", value))?;
    if count <= 0 || count > u32::MAX as i64 {
        return Err(crate::errors::ElementError::InvalidFrameCount(count).into());
    }
    Ok(count as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::Binding;
    use crate::errors::ElementError;

    fn standard_table(context: &HostContext, config: &HostConfig) -> BindingTable {
        let mut table = BindingTable::new();
        register_storyboard_api(&mut table, context, config).unwrap();
        table
    }

    fn call(table: &BindingTable, name: &str, args: &[ScriptValue]) -> Result<ScriptValue, HostError> {
        match table.entries().iter().find(|(entry, _)| entry == name) {
            Some((_, Binding::Method { func, .. })) => func(args),
            _ => panic!("no method named {name}"),
        }
    }

    fn s(text: &str) -> ScriptValue {
        ScriptValue::Str(text.to_string())
    }

    #[test]
    fn create_sprite_appends_an_attributed_element() {
        let context = HostContext::new();
        context.set_current_script("intro");
        let table = standard_table(&context, &HostConfig::default());

        call(
            &table,
            "create_sprite",
            &[
                s("bg.png"),
                s("Background"),
                s("Background"),
                s("Centre"),
                ScriptValue::Int(0),
                ScriptValue::Float(320.0),
                ScriptValue::Float(240.0),
            ],
        )
        .unwrap();

        let document = context.take_document();
        assert_eq!(document.element_count(), 1);
        let group = &document.groups()[0];
        assert_eq!(group.layer, Layer::Background);
        assert_eq!(group.name, "Background");
        let element = &group.elements()[0];
        assert_eq!(element.script, "intro");
        assert_eq!(element.start_time, 0.0);
        match &element.kind {
            ElementKind::Sprite { path, origin, x, y } => {
                assert_eq!(path, "bg.png");
                assert_eq!(*origin, Origin::Centre);
                assert_eq!((*x, *y), (320.0, 240.0));
            }
            other => panic!("expected sprite, got {}", other.name()),
        }
    }

    #[test]
    fn invalid_start_time_is_rejected_and_nothing_is_captured() {
        let context = HostContext::new();
        let table = standard_table(&context, &HostConfig::default());

        let err = call(
            &table,
            "create_sprite",
            &[
                s("bg.png"),
                s("Background"),
                s("g"),
                s("Centre"),
                ScriptValue::Float(-5.0),
                ScriptValue::Float(0.0),
                ScriptValue::Float(0.0),
            ],
        )
        .unwrap_err();

        assert!(matches!(
            err,
            HostError::Element(ElementError::InvalidStartTime(_))
        ));
        assert!(context.take_document().is_empty());
    }

    #[test]
    fn unknown_layer_names_are_rejected() {
        let context = HostContext::new();
        let table = standard_table(&context, &HostConfig::default());

        let err = call(&table, "get_group", &[s("Middleground"), s("g")]).unwrap_err();
        assert!(matches!(
            err,
            HostError::Element(ElementError::UnknownLayer(_))
        ));
    }

    #[test]
    fn get_group_creates_an_empty_group_idempotently() {
        let context = HostContext::new();
        let table = standard_table(&context, &HostConfig::default());

        call(&table, "get_group", &[s("Foreground"), s("dancers")]).unwrap();
        call(&table, "get_group", &[s("Foreground"), s("dancers")]).unwrap();

        let document = context.take_document();
        assert_eq!(document.groups().len(), 1);
        assert!(document.groups()[0].is_empty());
    }

    #[test]
    fn create_video_lands_on_the_video_layer() {
        let context = HostContext::new();
        context.set_current_script("clip");
        let table = standard_table(&context, &HostConfig::default());

        call(
            &table,
            "create_video",
            &[
                s("intro.mp4"),
                ScriptValue::Float(1000.0),
                ScriptValue::Float(0.0),
                ScriptValue::Float(0.0),
            ],
        )
        .unwrap();

        let document = context.take_document();
        let group = &document.groups()[0];
        assert_eq!(group.layer, Layer::Video);
        assert_eq!(group.name, "Video");
    }

    #[test]
    fn frame_count_must_be_positive() {
        let context = HostContext::new();
        let table = standard_table(&context, &HostConfig::default());

        let err = call(
            &table,
            "create_animation",
            &[
                s("frames.png"),
                s("Foreground"),
                s("g"),
                s("Centre"),
                ScriptValue::Float(0.0),
                ScriptValue::Float(0.0),
                ScriptValue::Float(0.0),
                ScriptValue::Int(0),
                ScriptValue::Float(50.0),
                s("Forever"),
            ],
        )
        .unwrap_err();

        assert!(matches!(
            err,
            HostError::Element(ElementError::InvalidFrameCount(0))
        ));
    }

    #[test]
    fn asset_path_joins_the_configured_root() {
        let context = HostContext::new();
        let config = HostConfig {
            asset_root: PathBuf::from("/projects/demo"),
            metadata: Vec::new(),
        };
        let table = standard_table(&context, &config);

        let result = call(&table, "asset_path", &[s("sb/bg.png")]).unwrap();
        let expected = PathBuf::from("/projects/demo")
            .join("sb/bg.png")
            .to_string_lossy()
            .into_owned();
        assert_eq!(result, ScriptValue::Str(expected));
    }

    #[test]
    fn namespaces_come_first_then_metadata_then_methods() {
        let context = HostContext::new();
        let config = HostConfig {
            asset_root: PathBuf::new(),
            metadata: vec![("audio".to_string(), s("song.mp3"))],
        };
        let table = standard_table(&context, &config);

        let names: Vec<&str> = table.entries().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(&names[..4], &["Layer", "Origin", "Loop", "audio"]);
        assert!(names.contains(&"create_sprite"));
        assert!(names.contains(&"log"));
    }

    #[test]
    fn metadata_name_collisions_fail_registration() {
        let context = HostContext::new();
        let config = HostConfig {
            asset_root: PathBuf::new(),
            metadata: vec![("Layer".to_string(), s("oops"))],
        };
        let mut table = BindingTable::new();
        let err = register_storyboard_api(&mut table, &context, &config).unwrap_err();
        assert!(matches!(err, ScriptError::Registration { .. }));
    }
}
