//! Packing settings tests
//!
//! Tests for:
//! - JSON loading with defaults
//! - Validation failures
//! - Settings-driven batches

use tessera::packing::{Batch, ConsumptionStage, PackingLayout, PackingSettings, StageSet};
use tessera::scene::{GradientNode, Hierarchy};
use tessera::sync::FrameSynchronizer;
use tessera::TesseraError;

// ============================================================================
// Loading
// ============================================================================

#[test]
fn empty_document_yields_defaults() {
    let settings = PackingSettings::from_json("{}").unwrap();
    assert_eq!(settings, PackingSettings::default());
    assert_eq!(settings.max_slots, 256);
    assert_eq!(settings.max_configurations, 3);
    assert_eq!(settings.default_alignment, 4);
}

#[test]
fn overrides_are_parsed() {
    let settings = PackingSettings::from_json(
        r#"{
            "max_slots": 16,
            "default_layout": "by_node",
            "overrides": [
                { "stage": "fragment", "layout": "by_value" },
                { "stage": "clip", "alignment": 8 }
            ]
        }"#,
    )
    .unwrap();

    let fragment = settings.config_for(ConsumptionStage::Fragment).unwrap();
    assert_eq!(fragment.layout, PackingLayout::ByValue);
    assert_eq!(fragment.max_slots, 16);
    let clip = settings.config_for(ConsumptionStage::Clip).unwrap();
    assert_eq!(clip.layout, PackingLayout::ByNode);
    assert_eq!(clip.alignment, 8);

    let reparsed = PackingSettings::from_json(&settings.to_json().unwrap()).unwrap();
    assert_eq!(reparsed, settings);
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn malformed_json_is_a_settings_error() {
    assert!(matches!(
        PackingSettings::from_json("{ \"max_slots\": \"many\" }"),
        Err(TesseraError::Settings(_))
    ));
}

#[test]
fn unusable_values_are_rejected() {
    assert!(matches!(
        PackingSettings::from_json(r#"{ "default_alignment": 0 }"#),
        Err(TesseraError::InvalidAlignment(0))
    ));
    assert!(matches!(
        PackingSettings::from_json(r#"{ "overrides": [{ "stage": "vertex", "alignment": 0 }] }"#),
        Err(TesseraError::InvalidSettings(_))
    ));
    assert!(matches!(
        PackingSettings::from_json(r#"{ "max_configurations": 0 }"#),
        Err(TesseraError::InvalidSettings(_))
    ));
    assert!(matches!(
        PackingSettings::from_json(r#"{ "max_slots": 0 }"#),
        Err(TesseraError::InvalidSettings(_))
    ));
}

// ============================================================================
// Batches
// ============================================================================

#[test]
fn batch_honours_layout_overrides_and_limits() {
    let sync = FrameSynchronizer::new();
    let scene = Hierarchy::<GradientNode>::shared();
    let settings = PackingSettings::from_json(
        r#"{ "max_slots": 8, "overrides": [{ "stage": "fragment", "layout": "by_value" }] }"#,
    )
    .unwrap();

    let batch = Batch::new(&sync, &scene, &settings, StageSet::all()).unwrap();
    assert_eq!(batch.slots().capacity(), 8);
    assert_eq!(batch.packer().configuration_count(), 3);
    assert_eq!(
        batch.data_for_stage(ConsumptionStage::Fragment).layout(),
        Some(PackingLayout::ByValue)
    );
    // Clip masks only need the transform.
    assert_eq!(batch.data_for_stage(ConsumptionStage::Clip).active_count(), 6);

    let tight = PackingSettings {
        max_configurations: 1,
        ..settings
    };
    assert!(matches!(
        Batch::new(&sync, &scene, &tight, StageSet::all()),
        Err(TesseraError::TooManyConfigurations { provisioned: 1, .. })
    ));
}
