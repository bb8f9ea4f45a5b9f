//! Three-set Venn diagram of significant gene sets

use std::path::Path;

use plotters::prelude::*;

use crate::error::{LimmaError, Result};
use crate::sets::OverlapSummary;

const SET_COLORS: [RGBColor; 3] = [
    RGBColor(214, 39, 40),
    RGBColor(31, 119, 180),
    RGBColor(44, 160, 44),
];

/// Draw a three-circle Venn diagram of the overlap summary to a PNG
/// file. Region counts come straight from the summary, so empty regions
/// are drawn with an explicit zero.
pub fn venn3_plot<P: AsRef<Path>>(path: P, summary: &OverlapSummary) -> Result<()> {
    let root = BitMapBackend::new(path.as_ref(), (900, 800)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    // Fixed layout: two circles on top, one below
    let radius = 190;
    let centers: [(i32, i32); 3] = [(350, 300), (550, 300), (450, 470)];

    for (i, &(cx, cy)) in centers.iter().enumerate() {
        root.draw(&Circle::new(
            (cx, cy),
            radius,
            SET_COLORS[i].mix(0.25).filled(),
        ))
        .map_err(plot_err)?;
        root.draw(&Circle::new(
            (cx, cy),
            radius,
            ShapeStyle::from(SET_COLORS[i]).stroke_width(2),
        ))
        .map_err(plot_err)?;
    }

    let label_style = ("sans-serif", 22).into_font().color(&BLACK);
    let count_style = ("sans-serif", 26).into_font().color(&BLACK);

    // Set labels with totals, outside the circles
    let label_pos: [(i32, i32); 3] = [(180, 110), (580, 110), (420, 690)];
    for i in 0..3 {
        root.draw(&Text::new(
            format!("{} (n={})", summary.labels[i], summary.sizes[i]),
            label_pos[i],
            label_style.clone(),
        ))
        .map_err(plot_err)?;
    }

    // Region counts: only A, only B, only C, A&B, A&C, B&C, core
    let region_pos: [(i32, i32); 7] = [
        (280, 280),
        (600, 280),
        (445, 560),
        (445, 250),
        (350, 430),
        (545, 430),
        (445, 370),
    ];
    for (i, &(x, y)) in region_pos.iter().enumerate() {
        root.draw(&Text::new(
            format!("{}", summary.regions[i]),
            (x, y),
            count_style.clone(),
        ))
        .map_err(plot_err)?;
    }

    root.present().map_err(plot_err)?;
    Ok(())
}

fn plot_err<E: std::fmt::Display>(e: E) -> LimmaError {
    LimmaError::PlotError {
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    fn toy_summary() -> OverlapSummary {
        let ids = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>();
        OverlapSummary {
            labels: ["M1-M0".into(), "M2-M0".into(), "M2-M1".into()],
            sizes: [4, 4, 3],
            pairwise: [3, 2, 2],
            core: ids(&["G3", "G7"]),
            exclusive: [ids(&["G1"]), ids(&["G4"]), ids(&["G5"])],
            regions: [1, 1, 1, 1, 0, 0, 2],
        }
    }

    #[test]
    fn test_venn3_writes_png() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("venn.png");
        venn3_plot(&path, &toy_summary()).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(&[0x89, b'P', b'N', b'G']));
    }

    #[test]
    fn test_venn3_all_empty_sets() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("venn_empty.png");
        let summary = OverlapSummary {
            labels: ["M1-M0".into(), "M2-M0".into(), "M2-M1".into()],
            sizes: [0, 0, 0],
            pairwise: [0, 0, 0],
            core: BTreeSet::new(),
            exclusive: [BTreeSet::new(), BTreeSet::new(), BTreeSet::new()],
            regions: [0; 7],
        };
        venn3_plot(&path, &summary).unwrap();
        assert!(path.exists());
    }
}
