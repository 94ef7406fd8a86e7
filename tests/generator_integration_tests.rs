//! Integration tests for ExperimentGenerator
//!
//! These tests verify:
//! - Two-phase loading of app definitions with includes, enums and aux references
//! - Fork enumeration (mixed radix, distinct combinations)
//! - SaveForks / CombineForks output and reloading SaveForks output
//! - Degradation on undefined classes and enumerations

use camino::{Utf8Path, Utf8PathBuf};
use proptest::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::sync::{Arc, Mutex};
use sweepforge::models::{ConfigNode, ForkValue, SaveMode, ValueKind};
use sweepforge::services::{ExperimentGenerator, GeneratorError};
use tempfile::TempDir;

const APP_DEFINITION: &str = r#"<App Name="RLSimion" Version="1.0">
  <Exe>bin/RLSimion.exe</Exe>
  <Pre>config/world.xml</Pre>
  <Pre>config/agent.xml</Pre>
  <Include>definitions.xml</Include>
  <Double Name="Gamma" Default="0.9"/>
  <Branch Name="Learner" Class="QLearner"/>
  <Integer Name="Episodes" Default="100"/>
  <Enum Name="Policy" Class="PolicyType" Default="Greedy"/>
  <AuxRef Name="State" Category="StateVariable"/>
</App>
"#;

const DEFINITIONS: &str = r#"<Definitions>
  <ClassDef Name="QLearner">
    <Double Name="Alpha" Default="0.1"/>
    <Bool Name="Trace" Default="false"/>
  </ClassDef>
  <EnumDef Name="PolicyType">
    <Value>Greedy</Value>
    <Value>SoftMax</Value>
  </EnumDef>
</Definitions>
"#;

const CONFIG_VALUES: &str = r#"<RLSimion Version="1.0">
  <Fork Name="Gamma">
    <Value Name="low"><Gamma>0.5</Gamma></Value>
    <Value Name="high"><Gamma>0.99</Gamma></Value>
  </Fork>
  <Learner>
    <Fork Name="Alpha">
      <Value><Alpha>0.01</Alpha></Value>
      <Value><Alpha>0.1</Alpha></Value>
      <Value><Alpha>0.5</Alpha></Value>
    </Fork>
    <Trace>true</Trace>
  </Learner>
  <Episodes>50</Episodes>
  <Policy>SoftMax</Policy>
</RLSimion>
"#;

const AUX_DEFINITIONS: &str = r#"<World>
  <StateVariable>
    <Variable><Name>position</Name></Variable>
    <Variable><Name>velocity</Name></Variable>
  </StateVariable>
</World>
"#;

struct Fixture {
    _temp_dir: TempDir,
    dir: Utf8PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let fixture = Self {
            _temp_dir: temp_dir,
            dir,
        };
        fixture.write("app.xml", APP_DEFINITION);
        fixture.write("definitions.xml", DEFINITIONS);
        fixture.write("values.xml", CONFIG_VALUES);
        fixture.write("aux.xml", AUX_DEFINITIONS);
        fixture
    }

    fn write(&self, name: &str, contents: &str) -> Utf8PathBuf {
        let path = self.dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn path(&self, name: &str) -> Utf8PathBuf {
        self.dir.join(name)
    }

    fn load(&self) -> ExperimentGenerator {
        let config = self.path("values.xml");
        let mut generator =
            ExperimentGenerator::load(&self.path("app.xml"), Some(config.as_path()), "sweep").unwrap();
        generator.load_aux_definitions(&self.path("aux.xml")).unwrap();
        generator
    }
}

fn read_documents(dir: &Utf8Path, extension: &str) -> Vec<String> {
    let mut contents: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.to_string_lossy().ends_with(extension))
        .map(|path| fs::read_to_string(path).unwrap())
        .collect();
    contents.sort();
    contents
}

#[test]
fn test_load_full_app_definition() {
    let fixture = Fixture::new();
    let generator = fixture.load();

    assert_eq!(generator.name(), "sweep");
    assert_eq!(generator.app_name(), "RLSimion");
    assert_eq!(generator.version(), "1.0");
    assert_eq!(generator.exe_file(), Some("bin/RLSimion.exe"));
    assert_eq!(
        generator.prerequisites(),
        ["config/world.xml".to_string(), "config/agent.xml".to_string()]
    );

    let names: Vec<&str> = generator.children().iter().map(ConfigNode::name).collect();
    assert_eq!(names, vec!["Gamma", "Learner", "Episodes", "Policy", "State"]);

    // Deferred steps have resolved the enumeration, the aux load the reference
    assert_eq!(generator.registry().pending_deferred_steps(), 0);
    assert!(generator.validate());
    assert_eq!(generator.children()[2].rendered_value().as_deref(), Some("50"));
    assert_eq!(generator.children()[3].rendered_value().as_deref(), Some("SoftMax"));
    assert_eq!(generator.children()[4].rendered_value().as_deref(), Some("position"));
}

#[test]
fn test_cardinalities_multiply_to_total() {
    let fixture = Fixture::new();
    let generator = fixture.load();

    let cardinalities: Vec<u64> = generator
        .children()
        .iter()
        .map(|child| child.cardinality().unwrap())
        .collect();
    assert_eq!(cardinalities, vec![2, 3, 1, 1, 1]);
    assert_eq!(generator.total_combinations().unwrap(), 6);
}

#[test]
fn test_combinations_are_pairwise_distinct() {
    let fixture = Fixture::new();
    let mut generator = fixture.load();

    let mut names = HashSet::new();
    let mut documents = HashSet::new();
    for index in 0..6 {
        let name = generator.select_combination(index).unwrap();
        let mut buffer = Vec::new();
        generator
            .write_to(&mut buffer, SaveMode::CombineForks, "")
            .unwrap();

        assert!(names.insert(name));
        assert!(documents.insert(String::from_utf8(buffer).unwrap()));
    }

    assert!(names.contains("sweep-low-0.01"));
    assert!(names.contains("sweep-high-0.5"));
}

#[test]
fn test_combine_forks_writes_one_file_per_combination() {
    let fixture = Fixture::new();
    let mut generator = fixture.load();
    let out = fixture.path("runs");

    let written = generator
        .save_all(&out, SaveMode::CombineForks, ".exp")
        .unwrap();

    assert_eq!(written.len(), 6);
    assert_eq!(written.iter().collect::<HashSet<_>>().len(), 6);
    assert_eq!(written[0], out.join("sweep-low-0.01.exp"));
    assert_eq!(written[1], out.join("sweep-high-0.01.exp"));

    let contents = read_documents(&out, ".exp");
    assert_eq!(contents.len(), 6);
    for document in &contents {
        assert!(!document.contains("<Fork"));
        assert!(document.contains("<Episodes>50</Episodes>"));
        assert!(document.contains("<Trace>true</Trace>"));
    }
}

#[test]
fn test_save_forks_reloads_with_same_total() {
    let fixture = Fixture::new();
    let mut generator = fixture.load();
    let out = fixture.path("forks");

    let written = generator.save_all(&out, SaveMode::SaveForks, ".exp").unwrap();
    assert_eq!(written, vec![out.join("sweep.exp")]);

    let saved = fs::read_to_string(&written[0]).unwrap();
    assert_eq!(saved.matches("<Fork ").count(), 2);
    assert!(saved.contains("<Gamma>0.5</Gamma>"));
    assert!(saved.contains("<Gamma>0.99</Gamma>"));

    let mut reloaded =
        ExperimentGenerator::load(&fixture.path("app.xml"), Some(written[0].as_path()), "sweep").unwrap();
    assert_eq!(reloaded.total_combinations().unwrap(), 6);
    assert_eq!(reloaded.file_name(), Some(written[0].as_path()));

    // Fork value names survive the round trip
    let mut original_names = Vec::new();
    let mut reloaded_names = Vec::new();
    for index in 0..6 {
        original_names.push(generator.select_combination(index).unwrap());
        reloaded_names.push(reloaded.select_combination(index).unwrap());
    }
    assert_eq!(original_names, reloaded_names);
}

#[test]
fn test_missing_config_values_use_defaults() {
    let fixture = Fixture::new();
    let generator =
        ExperimentGenerator::load(&fixture.path("app.xml"), None, "defaults").unwrap();

    assert_eq!(generator.total_combinations().unwrap(), 1);
    assert_eq!(generator.children()[0].rendered_value().as_deref(), Some("0.9"));
    assert_eq!(generator.children()[3].rendered_value().as_deref(), Some("Greedy"));

    // The aux reference stays unresolved until aux definitions are loaded
    assert!(!generator.validate());
}

#[test]
fn test_aux_reload_reresolves_references() {
    let fixture = Fixture::new();
    let mut generator = fixture.load();
    assert_eq!(generator.registry().forward_reference_count(), 1);

    let replacement = fixture.write(
        "aux2.xml",
        r#"<World><StateVariable><Variable><Name>angle</Name></Variable></StateVariable></World>"#,
    );
    generator.load_aux_definitions(&replacement).unwrap();

    // State has no configured value and follows the first aux choice
    assert_eq!(generator.children()[4].rendered_value().as_deref(), Some("angle"));
    assert!(generator.validate());
}

/// Shared buffer collecting formatted log output
#[derive(Clone, Default)]
struct CapturedLog(Arc<Mutex<Vec<u8>>>);

impl CapturedLog {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_unresolved_aux_reference_warns_after_aux_load() {
    let fixture = Fixture::new();
    let app = fixture.write(
        "aux_app.xml",
        r#"<App Name="RLSimion"><AuxRef Name="S" Category="Nope"/></App>"#,
    );
    let aux = fixture.write(
        "actions.xml",
        r#"<World><Action><Variable><Name>left</Name></Variable></Action></World>"#,
    );

    let log = CapturedLog::default();
    let writer = log.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();

    let (before_aux, generator) = tracing::subscriber::with_default(subscriber, || {
        let mut generator = ExperimentGenerator::load(&app, None, "aux").unwrap();
        let before_aux = log.contents();
        generator.load_aux_definitions(&aux).unwrap();
        (before_aux, generator)
    });

    // Seeding at load time stays quiet; the aux load reports the missing category
    assert!(!before_aux.contains("Undefined reference"));
    assert!(log.contents().contains("Undefined reference to aux category: Nope"));
    assert!(!generator.validate());
}

#[test]
fn test_undefined_class_and_enum_degrade() {
    let fixture = Fixture::new();
    let app = fixture.write(
        "broken_app.xml",
        r#"<App Name="RLSimion" Version="1.0">
  <Branch Name="Critic" Class="Missing"/>
  <Enum Name="Mode" Class="MissingEnum" Default="A"/>
  <Double Name="Gamma" Default="0.9"/>
</App>"#,
    );

    let generator = ExperimentGenerator::load(&app, None, "broken").unwrap();
    assert_eq!(generator.children().len(), 3);
    match &generator.children()[0] {
        ConfigNode::Branch(branch) => assert!(branch.children.is_empty()),
        other => panic!("expected branch, got {:?}", other),
    }
    match &generator.children()[1] {
        ConfigNode::Enum(node) => assert!(!node.choices.is_resolved()),
        other => panic!("expected enum, got {:?}", other),
    }
    assert_eq!(generator.total_combinations().unwrap(), 1);
    assert!(!generator.validate());
}

#[test]
fn test_missing_documents_are_typed_errors() {
    let fixture = Fixture::new();

    let err = ExperimentGenerator::load(&fixture.path("absent.xml"), None, "x").unwrap_err();
    assert!(matches!(err, GeneratorError::Document(ref e) if e.is_not_found()));

    let app = fixture.write(
        "bad_include.xml",
        r#"<App Name="RLSimion"><Include>nowhere.xml</Include></App>"#,
    );
    let err = ExperimentGenerator::load(&app, None, "x").unwrap_err();
    assert!(matches!(err, GeneratorError::Document(ref e) if e.is_not_found()));

    let corrupt = fixture.write("corrupt.xml", "<RLSimion><Gamma>");
    let err = ExperimentGenerator::load(&fixture.path("app.xml"), Some(corrupt.as_path()), "x").unwrap_err();
    assert!(matches!(err, GeneratorError::Document(ref e) if !e.is_not_found()));
}

#[test]
fn test_unwritable_names_are_rejected() {
    let fixture = Fixture::new();

    let app = fixture.write("bad_name.xml", r#"<App Name="RL Simion"/>"#);
    let err = ExperimentGenerator::load(&app, None, "x").unwrap_err();
    assert!(matches!(err, GeneratorError::Document(ref e) if !e.is_not_found()));

    let app = fixture.write(
        "bad_member.xml",
        r#"<App Name="RLSimion"><Double Name="Gamma&lt;x" Default="1"/><Double Name="Gamma" Default="0.9"/></App>"#,
    );
    let mut generator = ExperimentGenerator::load(&app, None, "x").unwrap();
    assert_eq!(generator.children().len(), 1);

    let mut out = Vec::new();
    generator.select_combination(0).unwrap();
    generator.write_to(&mut out, SaveMode::CombineForks, "").unwrap();
    let written = String::from_utf8(out).unwrap();
    assert!(roxmltree::Document::parse(&written).is_ok());
    assert!(!written.contains("Gamma<x"));
}

#[test]
fn test_duplicate_combination_names_get_unique_files() {
    let fixture = Fixture::new();
    let mut generator = ExperimentGenerator::new("dup", "RLSimion", "1");
    generator.push_child(ConfigNode::fork(
        "Gamma",
        vec![
            ForkValue::named("same", ConfigNode::value(ValueKind::Double, "Gamma", "0.1")),
            ForkValue::named("same", ConfigNode::value(ValueKind::Double, "Gamma", "0.2")),
        ],
    ));

    let out = fixture.path("dup");
    let written = generator
        .save_all(&out, SaveMode::CombineForks, ".exp")
        .unwrap();

    assert_eq!(written, vec![out.join("dup-same.exp"), out.join("dup-same-1.exp")]);
}

fn fork_of(name: &str, count: usize) -> ConfigNode {
    ConfigNode::fork(
        name,
        (0..count)
            .map(|i| ForkValue::new(ConfigNode::value(ValueKind::Integer, name, i.to_string())))
            .collect(),
    )
}

proptest! {
    #[test]
    fn selections_cover_the_cartesian_product(counts in prop::collection::vec(1usize..4, 1..4)) {
        let mut generator = ExperimentGenerator::new("p", "App", "1");
        for (i, count) in counts.iter().enumerate() {
            generator.push_child(fork_of(&format!("F{}", i), *count));
        }

        let total = generator.total_combinations().unwrap();
        prop_assert_eq!(total, counts.iter().map(|c| *c as u64).product::<u64>());

        let mut seen = HashSet::new();
        for index in 0..total {
            let name = generator.select_combination(index).unwrap();
            prop_assert!(seen.insert(name));
        }
        prop_assert_eq!(seen.len() as u64, total);
    }
}
