use visual_tests::{run_visual_test, should_update_references, update_reference, VisualTestConfig};

/// Helper macro to generate visual test functions
macro_rules! visual_test {
    ($name:ident, $scene:literal) => {
        #[test]
        fn $name() {
            let _ = env_logger::builder().is_test(true).try_init();
            if should_update_references() {
                update_reference($scene).expect("Failed to update reference");
                return;
            }

            let result = run_visual_test(&VisualTestConfig {
                scene_name: $scene.to_string(),
                similarity_threshold: 0.999, // 99.9% - both paths must agree
            })
            .expect("Visual test failed to run");

            assert!(
                result.passed,
                "Paint paths disagree for '{}': similarity {:.4}%, reference {:?} (threshold: 99.9%)\n\
                 Captured: {}\n\
                 Complex:  {}\n\
                 Diff:     {}",
                $scene,
                result.similarity * 100.0,
                result.reference_similarity,
                result.captured_path.display(),
                result.complex_path.display(),
                result
                    .diff_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "N/A".to_string())
            );
        }
    };
}

visual_test!(test_single_fill, "single_fill");
visual_test!(test_single_stroke, "single_stroke");
visual_test!(test_fill_and_stroke, "fill_and_stroke");
visual_test!(test_complex, "complex");

#[test]
fn test_unknown_scene_is_reported() {
    let result = run_visual_test(&VisualTestConfig {
        scene_name: "no_such_scene".to_string(),
        ..Default::default()
    });
    assert!(matches!(
        result,
        Err(visual_tests::VisualTestError::UnknownScene(_))
    ));
}
