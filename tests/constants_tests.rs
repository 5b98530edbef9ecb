// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for constants module

use xr_depth::constants::{self, GridPreset};

#[test]
fn test_grid_preset_values() {
    assert_eq!(GridPreset::ALL.len(), 3);
    assert_eq!(GridPreset::default(), GridPreset::Dense);
    assert_eq!(
        GridPreset::Dense.vertices_per_side(),
        constants::surface::DENSE_GRID
    );
}

#[test]
fn test_grid_preset_ordering() {
    // Presets are ordered from coarsest to densest
    let mut prev = 0u32;
    for preset in GridPreset::ALL {
        let side = preset.vertices_per_side();
        assert!(side > prev, "Presets should be ordered coarse to dense");
        prev = side;
    }
}

#[test]
fn test_grid_preset_display_names() {
    for preset in GridPreset::ALL {
        assert!(
            !preset.display_name().is_empty(),
            "Preset {:?} has empty display name",
            preset
        );
    }
}

#[test]
fn test_blur_pass_count() {
    assert_eq!(constants::occlusion::PYRAMID_LEVELS, 3);
    assert_eq!(constants::occlusion::BLUR_PASSES, 6);
}

#[test]
fn test_format_depth() {
    assert_eq!(constants::format_depth(0.0), "no data");
    assert_eq!(constants::format_depth(0.85), "85 cm");
    assert_eq!(constants::format_depth(4.096), "4.10 m");
}
