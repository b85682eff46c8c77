//! End-to-end runtime behavior: execution order, failure isolation, hot
//! reload and the capture document, driven through real engines where the
//! scenario needs one and through stub scripts where only orchestration is
//! under test.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use stagehand_core::{
    register_storyboard_api, BindingTable, ElementKind, FsScriptSource, HostConfig, Language,
    LanguageAdapter, Layer, LuaAdapter, RhaiAdapter, Script, ScriptCache, ScriptError,
    ScriptRuntime, ScriptSource, ScriptState, ScriptValue, SourceChange,
};

// Stub scripts let the orchestration tests observe ordering without any
// engine in the loop; the storyboard scenarios below use the real ones.

type PerformFn = Arc<dyn Fn() -> Result<(), ScriptError> + Send + Sync>;

struct StubScript {
    name: String,
    path: PathBuf,
    language: Language,
    state: ScriptState,
    on_perform: PerformFn,
}

impl Script for StubScript {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn language(&self) -> Language {
        self.language
    }

    fn state(&self) -> ScriptState {
        self.state
    }

    fn load(&mut self, _bindings: &BindingTable) -> Result<(), ScriptError> {
        self.state = ScriptState::Loaded;
        Ok(())
    }

    fn perform(&mut self) -> Result<(), ScriptError> {
        match (self.on_perform)() {
            Ok(()) => {
                self.state = ScriptState::Ran;
                Ok(())
            }
            Err(error) => {
                self.state = ScriptState::Faulted;
                Err(error)
            }
        }
    }

    fn dispose(&mut self) -> Result<(), ScriptError> {
        self.state = ScriptState::Disposed;
        Ok(())
    }
}

struct StubAdapter {
    language: Language,
    cache: ScriptCache,
}

impl StubAdapter {
    fn boxed(language: Language) -> Box<dyn LanguageAdapter> {
        Box::new(StubAdapter {
            language,
            cache: ScriptCache::new(),
        })
    }
}

impl LanguageAdapter for StubAdapter {
    fn language(&self) -> Language {
        self.language
    }

    fn create_script(&self, name: &str, path: &Path) -> Box<dyn Script> {
        Box::new(StubScript {
            name: name.to_string(),
            path: path.to_path_buf(),
            language: self.language,
            state: ScriptState::Unloaded,
            on_perform: Arc::new(|| Ok(())),
        })
    }

    fn cache(&self) -> &ScriptCache {
        &self.cache
    }

    fn cache_mut(&mut self) -> &mut ScriptCache {
        &mut self.cache
    }
}

fn stub(
    name: &str,
    language: Language,
    journal: &Arc<Mutex<Vec<String>>>,
    fails: bool,
) -> Box<dyn Script> {
    let journal = Arc::clone(journal);
    let entry = name.to_string();
    Box::new(StubScript {
        name: name.to_string(),
        path: PathBuf::from(format!("{name}.{}", language.as_str())),
        language,
        state: ScriptState::Unloaded,
        on_perform: Arc::new(move || {
            journal.lock().unwrap().push(entry.clone());
            if fails {
                Err(ScriptError::runtime("deliberate"))
            } else {
                Ok(())
            }
        }),
    })
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

/// Runtime with Lua then Rhai adapters and the standard host API installed.
fn storyboard_runtime(dir: &Path) -> ScriptRuntime {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let source: Arc<dyn ScriptSource> = Arc::new(FsScriptSource::new(dir));
    let mut runtime = ScriptRuntime::new();
    runtime.register_adapter(Box::new(LuaAdapter::new(Arc::clone(&source))));
    runtime.register_adapter(Box::new(RhaiAdapter::new(Arc::clone(&source))));
    install_api(&mut runtime, dir);
    runtime
}

fn install_api(runtime: &mut ScriptRuntime, dir: &Path) {
    let context = runtime.context().clone();
    let config = HostConfig {
        asset_root: dir.to_path_buf(),
        metadata: vec![("song".to_string(), ScriptValue::Str("audio.mp3".into()))],
    };
    register_storyboard_api(runtime.bindings_mut(), &context, &config).unwrap();
}

#[test]
fn run_performs_every_script_in_adapter_then_insertion_order() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let mut runtime = ScriptRuntime::new();
    runtime.register_adapter(StubAdapter::boxed(Language::Lua));
    runtime.register_adapter(StubAdapter::boxed(Language::Rhai));

    let lua = runtime.adapter_mut(Language::Lua).unwrap();
    lua.cache_mut().add(stub("alpha", Language::Lua, &journal, false));
    lua.cache_mut().add(stub("beta", Language::Lua, &journal, true));
    let rhai = runtime.adapter_mut(Language::Rhai).unwrap();
    rhai.cache_mut().add(stub("gamma", Language::Rhai, &journal, false));
    rhai.cache_mut().add(stub("delta", Language::Rhai, &journal, false));

    let result = runtime.run();

    // The failing script was still performed, and nothing after it skipped.
    assert_eq!(
        *journal.lock().unwrap(),
        vec!["alpha", "beta", "gamma", "delta"]
    );
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].script, "beta");
}

#[test]
fn repeated_runs_visit_scripts_identically() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let mut runtime = ScriptRuntime::new();
    runtime.register_adapter(StubAdapter::boxed(Language::Lua));
    let lua = runtime.adapter_mut(Language::Lua).unwrap();
    lua.cache_mut().add(stub("one", Language::Lua, &journal, false));
    lua.cache_mut().add(stub("two", Language::Lua, &journal, true));
    lua.cache_mut().add(stub("three", Language::Lua, &journal, false));

    let first = runtime.run();
    let second = runtime.run();

    let journal = journal.lock().unwrap();
    assert_eq!(journal.len(), 6);
    assert_eq!(journal[..3], journal[3..]);
    // The faulted script is retried, and fails again, on every pass.
    assert_eq!(first.failures.len(), 1);
    assert_eq!(second.failures.len(), 1);
}

#[test]
fn a_background_sprite_lands_in_the_background_group() {
    let dir = tempfile::tempdir().unwrap();
    write_script(
        dir.path(),
        "background.lua",
        r#"create_sprite("bg.png", Layer.Background, get_group(Layer.Background, "Background"), Origin.Centre, 0, 320, 240)"#,
    );

    let mut runtime = storyboard_runtime(dir.path());
    runtime.reload(&FsScriptSource::new(dir.path())).unwrap();
    let result = runtime.run();

    assert!(result.is_clean(), "failures: {:?}", result.failures);
    let document = result.document;
    assert_eq!(document.element_count(), 1);
    let group = &document.groups()[0];
    assert_eq!(group.layer, Layer::Background);
    assert_eq!(group.name, "Background");
    let element = &group.elements()[0];
    assert_eq!(element.script, "background");
    assert_eq!(element.start_time, 0.0);
    match &element.kind {
        ElementKind::Sprite { path, x, y, .. } => {
            assert_eq!(path, "bg.png");
            assert_eq!((*x, *y), (320.0, 240.0));
        }
        other => panic!("expected a sprite, got {}", other.name()),
    }
}

#[test]
fn a_raising_script_does_not_disturb_its_neighbours() {
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "crash.lua", r#"error("deliberate")"#);
    write_script(
        dir.path(),
        "stable.rhai",
        r#"create_sprite("ok.png", Layer.Pass, "survivors", Origin.Centre, 10.0, 1.0, 2.0);"#,
    );

    let mut runtime = storyboard_runtime(dir.path());
    runtime.reload(&FsScriptSource::new(dir.path())).unwrap();
    let result = runtime.run();

    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].script, "crash");
    assert!(result.failures[0].message.contains("deliberate"));
    assert_eq!(result.document.element_count(), 1);
    assert_eq!(result.document.groups()[0].name, "survivors");
}

#[test]
fn isolation_holds_with_the_adapter_order_reversed() {
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "crash.lua", r#"error("deliberate")"#);
    write_script(
        dir.path(),
        "stable.rhai",
        r#"create_sprite("ok.png", Layer.Pass, "survivors", Origin.Centre, 10.0, 1.0, 2.0);"#,
    );

    let source: Arc<dyn ScriptSource> = Arc::new(FsScriptSource::new(dir.path()));
    let mut runtime = ScriptRuntime::new();
    runtime.register_adapter(Box::new(RhaiAdapter::new(Arc::clone(&source))));
    runtime.register_adapter(Box::new(LuaAdapter::new(Arc::clone(&source))));
    install_api(&mut runtime, dir.path());
    runtime.reload(&FsScriptSource::new(dir.path())).unwrap();
    let result = runtime.run();

    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].script, "crash");
    assert_eq!(result.document.element_count(), 1);
}

#[test]
fn elements_declared_before_a_fault_are_kept() {
    let dir = tempfile::tempdir().unwrap();
    write_script(
        dir.path(),
        "partial.lua",
        r#"
create_sprite("first.png", Layer.Foreground, "fx", Origin.Centre, 100, 0, 0)
error("halfway through")
"#,
    );

    let mut runtime = storyboard_runtime(dir.path());
    runtime.reload(&FsScriptSource::new(dir.path())).unwrap();
    let result = runtime.run();

    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.document.element_count(), 1);
    assert_eq!(result.document.groups()[0].elements()[0].kind.path(), "first.png");
}

#[test]
fn a_caught_validation_error_leaves_no_trace() {
    let dir = tempfile::tempdir().unwrap();
    write_script(
        dir.path(),
        "careful.lua",
        r#"
local ok = pcall(create_sprite, "late.png", Layer.Pass, "g", Origin.Centre, -1, 0, 0)
assert(not ok, "negative start time should be rejected")
create_sprite("good.png", Layer.Pass, "g", Origin.Centre, 5, 0, 0)
"#,
    );

    let mut runtime = storyboard_runtime(dir.path());
    runtime.reload(&FsScriptSource::new(dir.path())).unwrap();
    let result = runtime.run();

    assert!(result.is_clean(), "failures: {:?}", result.failures);
    assert_eq!(result.document.element_count(), 1);
    assert_eq!(result.document.groups()[0].elements()[0].kind.path(), "good.png");
}

#[test]
fn faulted_scripts_stay_cached_and_retry_on_the_next_pass() {
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "flaky.lua", r#"error("always")"#);

    let mut runtime = storyboard_runtime(dir.path());
    runtime.reload(&FsScriptSource::new(dir.path())).unwrap();

    let first = runtime.run();
    assert_eq!(first.failures.len(), 1);
    let states: Vec<ScriptState> = runtime.compile().map(|s| s.state()).collect();
    assert_eq!(states, vec![ScriptState::Faulted]);

    let second = runtime.run();
    assert_eq!(second.failures.len(), 1);
    assert_eq!(runtime.script_count(), 1);
}

#[test]
fn an_unreadable_source_surfaces_as_a_compile_failure() {
    let dir = tempfile::tempdir().unwrap();
    let mut runtime = storyboard_runtime(dir.path());

    // Never written to disk; reading it at creation time fails.
    runtime.apply_change(&SourceChange::Added(dir.path().join("ghost.lua")));
    assert_eq!(runtime.script_count(), 1);

    let result = runtime.run();
    assert_eq!(result.failures.len(), 1);
    assert!(result.failures[0].message.starts_with("compile error"));
    assert!(result.document.is_empty());
}

#[test]
fn modified_files_replace_their_script_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_script(
        dir.path(),
        "scene.lua",
        r#"create_sprite("v1.png", Layer.Background, "g", Origin.Centre, 0, 0, 0)"#,
    );

    let mut runtime = storyboard_runtime(dir.path());
    runtime.reload(&FsScriptSource::new(dir.path())).unwrap();
    let first = runtime.run();
    assert_eq!(first.document.groups()[0].elements()[0].kind.path(), "v1.png");

    write_script(
        dir.path(),
        "scene.lua",
        r#"create_sprite("v2.png", Layer.Background, "g", Origin.Centre, 0, 0, 0)"#,
    );
    runtime.apply_change(&SourceChange::Modified(path));

    let second = runtime.run();
    assert_eq!(second.document.element_count(), 1);
    assert_eq!(second.document.groups()[0].elements()[0].kind.path(), "v2.png");
}

/// Lists Lua sources; listing any other language fails.
struct LuaOnlySource {
    lua_paths: Vec<PathBuf>,
}

impl ScriptSource for LuaOnlySource {
    fn list_paths(&self, extensions: &[&str]) -> anyhow::Result<Vec<PathBuf>> {
        if extensions.contains(&"lua") {
            Ok(self.lua_paths.clone())
        } else {
            anyhow::bail!("listing unavailable")
        }
    }

    fn read_source(&self, _path: &Path) -> anyhow::Result<String> {
        Ok(String::new())
    }
}

#[test]
fn a_failed_reload_leaves_every_cache_untouched() {
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "a.lua", "x = 1");
    write_script(dir.path(), "b.rhai", "let x = 1;");

    let mut runtime = storyboard_runtime(dir.path());
    runtime.reload(&FsScriptSource::new(dir.path())).unwrap();
    assert_eq!(runtime.script_count(), 2);

    // The Lua listing succeeds with a different file set before the Rhai
    // listing fails; neither cache may change.
    let broken = LuaOnlySource {
        lua_paths: vec![dir.path().join("replacement.lua")],
    };
    assert!(runtime.reload(&broken).is_err());

    let names: Vec<&str> = runtime.compile().map(|s| s.name()).collect();
    assert_eq!(names, vec!["a", "b"]);
}

#[test]
fn reload_rebuilds_the_caches_from_the_current_file_set() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_script(dir.path(), "a.lua", "x = 1");
    write_script(dir.path(), "b.rhai", "let x = 1;");

    let mut runtime = storyboard_runtime(dir.path());
    runtime.reload(&FsScriptSource::new(dir.path())).unwrap();
    assert_eq!(runtime.script_count(), 2);

    std::fs::remove_file(&a).unwrap();
    write_script(dir.path(), "c.lua", "x = 2");
    runtime.reload(&FsScriptSource::new(dir.path())).unwrap();

    let names: Vec<&str> = runtime.compile().map(|s| s.name()).collect();
    assert_eq!(names, vec!["c", "b"]);
}

#[test]
fn removal_drops_the_cache_entry() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_script(
        dir.path(),
        "a.lua",
        r#"create_sprite("a.png", Layer.Pass, "g", Origin.Centre, 0, 0, 0)"#,
    );
    write_script(
        dir.path(),
        "b.lua",
        r#"create_sprite("b.png", Layer.Pass, "g", Origin.Centre, 0, 0, 0)"#,
    );

    let mut runtime = storyboard_runtime(dir.path());
    runtime.reload(&FsScriptSource::new(dir.path())).unwrap();
    assert_eq!(runtime.script_count(), 2);

    runtime.apply_change(&SourceChange::Removed(a));
    assert_eq!(runtime.script_count(), 1);

    let result = runtime.run();
    assert_eq!(result.document.element_count(), 1);
    assert_eq!(result.document.groups()[0].elements()[0].kind.path(), "b.png");
}

#[test]
fn added_files_append_after_existing_scripts() {
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "a.lua", "x = 1");

    let mut runtime = storyboard_runtime(dir.path());
    runtime.reload(&FsScriptSource::new(dir.path())).unwrap();

    let b = write_script(dir.path(), "b.lua", "x = 2");
    runtime.apply_change(&SourceChange::Added(b));

    let names: Vec<&str> = runtime.compile().map(|s| s.name()).collect();
    assert_eq!(names, vec!["a", "b"]);
}

#[test]
fn unclaimed_extensions_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let notes = write_script(dir.path(), "notes.txt", "not a script");

    let mut runtime = storyboard_runtime(dir.path());
    runtime.reload(&FsScriptSource::new(dir.path())).unwrap();
    assert_eq!(runtime.script_count(), 0);

    runtime.apply_change(&SourceChange::Added(notes));
    assert_eq!(runtime.script_count(), 0);
}

#[test]
fn two_passes_over_unchanged_scripts_produce_equal_documents() {
    let dir = tempfile::tempdir().unwrap();
    write_script(
        dir.path(),
        "mix.lua",
        r#"
create_sprite("one.png", Layer.Background, "g", Origin.Centre, 0, 0, 0)
create_sample("hit.wav", Layer.Foreground, "sfx", 250, 80)
"#,
    );
    write_script(
        dir.path(),
        "more.rhai",
        r#"create_video("clip.mp4", 0.0, 4.0, 8.0);"#,
    );

    let mut runtime = storyboard_runtime(dir.path());
    runtime.reload(&FsScriptSource::new(dir.path())).unwrap();

    let first = runtime.run();
    let second = runtime.run();

    assert!(first.is_clean() && second.is_clean());
    assert_eq!(first.document, second.document);
    assert_eq!(first.document.element_count(), 3);
}

#[test]
fn clear_disposes_and_empties_every_cache() {
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "a.lua", "x = 1");
    write_script(dir.path(), "b.rhai", "let x = 1;");

    let mut runtime = storyboard_runtime(dir.path());
    runtime.reload(&FsScriptSource::new(dir.path())).unwrap();
    runtime.run();

    runtime.clear();
    assert_eq!(runtime.script_count(), 0);
    assert!(runtime.run().document.is_empty());
}
