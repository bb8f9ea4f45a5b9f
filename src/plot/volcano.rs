//! Volcano plot: effect size against evidence strength

use std::path::Path;

use plotters::prelude::*;

use crate::error::{LimmaError, Result};
use crate::io::TopTable;
use crate::testing::{classify, Regulation, SignificanceThresholds};

const UP_COLOR: RGBColor = RGBColor(214, 39, 40);
const DOWN_COLOR: RGBColor = RGBColor(31, 119, 180);
const NS_COLOR: RGBColor = RGBColor(150, 150, 150);

/// Smallest adjusted p-value shown; zeros are clamped so -log10 stays
/// finite.
const P_FLOOR: f64 = 1e-300;

/// Draw a volcano plot of one contrast to a PNG file.
///
/// Each testable gene becomes a point at (logFC, -log10 adj.P.Val),
/// colored by its significance call. Genes with NaN statistics are
/// omitted. Dashed guide lines mark both thresholds.
pub fn volcano_plot<P: AsRef<Path>>(
    path: P,
    table: &TopTable,
    thresholds: &SignificanceThresholds,
) -> Result<()> {
    let points: Vec<(f64, f64, Regulation)> = (0..table.n_genes())
        .filter_map(|i| {
            let fc = table.log2_fold_changes[i];
            let p = table.padj[i];
            if fc.is_finite() && p.is_finite() {
                let y = -p.max(P_FLOOR).log10();
                Some((fc, y, classify(fc, p, thresholds)))
            } else {
                None
            }
        })
        .collect();

    if points.is_empty() {
        return Err(LimmaError::PlotError {
            reason: format!(
                "No testable genes to plot for contrast {}",
                table.contrast.label()
            ),
        });
    }

    let x_abs = points
        .iter()
        .map(|p| p.0.abs())
        .fold(thresholds.min_abs_log2_fc, f64::max)
        * 1.05;
    let y_max = points.iter().map(|p| p.1).fold(1.0, f64::max) * 1.05;

    let n_up = points.iter().filter(|p| p.2 == Regulation::Up).count();
    let n_down = points.iter().filter(|p| p.2 == Regulation::Down).count();

    let root = BitMapBackend::new(path.as_ref(), (900, 700)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let caption = format!("{} ({} up, {} down)", table.contrast, n_up, n_down);
    let mut chart = ChartBuilder::on(&root)
        .caption(caption, ("sans-serif", 28))
        .margin(15)
        .x_label_area_size(45)
        .y_label_area_size(55)
        .build_cartesian_2d(-x_abs..x_abs, 0.0..y_max)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .x_desc("log2 fold change")
        .y_desc("-log10 adjusted p-value")
        .disable_mesh()
        .draw()
        .map_err(plot_err)?;

    // Threshold guides
    let sig_y = -thresholds.max_adj_p.log10();
    let guide = ShapeStyle::from(BLACK.mix(0.4)).stroke_width(1);
    chart
        .draw_series(DashedLineSeries::new(
            vec![(-x_abs, sig_y), (x_abs, sig_y)],
            6,
            4,
            guide,
        ))
        .map_err(plot_err)?;
    for sign in [-1.0, 1.0] {
        let x = sign * thresholds.min_abs_log2_fc;
        chart
            .draw_series(DashedLineSeries::new(
                vec![(x, 0.0), (x, y_max)],
                6,
                4,
                guide,
            ))
            .map_err(plot_err)?;
    }

    for (color, call) in [
        (NS_COLOR, Regulation::NotSignificant),
        (UP_COLOR, Regulation::Up),
        (DOWN_COLOR, Regulation::Down),
    ] {
        chart
            .draw_series(
                points
                    .iter()
                    .filter(|p| p.2 == call)
                    .map(|p| Circle::new((p.0, p.1), 2, color.mix(0.6).filled())),
            )
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
    use crate::io::Contrast;
    use ndarray::Array1;
    use tempfile::tempdir;

    fn toy_table() -> TopTable {
        let n = 50;
        let gene_ids: Vec<String> = (0..n).map(|i| format!("g{}", i)).collect();
        let fcs = Array1::from_iter((0..n).map(|i| (i as f64 - 25.0) / 5.0));
        let ps = Array1::from_iter((0..n).map(|i| ((i + 1) as f64) / n as f64));
        TopTable {
            contrast: Contrast::parse("M1-M0").unwrap(),
            gene_ids,
            log2_fold_changes: fcs,
            ave_expr: Array1::zeros(n),
            t: Array1::zeros(n),
            pvalues: ps.clone(),
            padj: ps,
            lods: Array1::zeros(n),
        }
    }

    #[test]
    fn test_volcano_writes_png() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("volcano.png");
        volcano_plot(&path, &toy_table(), &SignificanceThresholds::default()).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(&[0x89, b'P', b'N', b'G']));
    }

    #[test]
    fn test_volcano_rejects_all_nan() {
        let mut table = toy_table();
        table.padj = Array1::from_elem(table.n_genes(), f64::NAN);
        let dir = tempdir().unwrap();
        let path = dir.path().join("volcano.png");
        assert!(volcano_plot(&path, &table, &SignificanceThresholds::default()).is_err());
    }
}
