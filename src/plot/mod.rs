use std::fmt::Write as _;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

use crate::config::PlotBackend;
use crate::error::{HarnessError, Result};
use crate::massif::Snapshot;

/// A memory time series to draw.
#[derive(Debug, Clone)]
pub struct PlotRequest {
    pub title: String,
    pub snapshots: Vec<Snapshot>,
    pub output: PathBuf,
}

impl PlotRequest {
    pub fn new(algorithm: &str, dataset: &str, snapshots: Vec<Snapshot>, output: PathBuf) -> Self {
        PlotRequest {
            title: format!("Memory Usage Over Time for search {} on {}", algorithm, dataset),
            snapshots,
            output,
        }
    }
}

/// Renders heap and extra-heap usage over time into an image file.
///
/// Implementations need not be safe to call concurrently; callers serialize rendering.
pub trait Plotter: Send + Sync {
    /// File extension of the produced image
    fn extension(&self) -> &'static str;

    fn render(&self, request: &PlotRequest) -> Result<()>;
}

pub fn plotter_for(backend: PlotBackend) -> Box<dyn Plotter> {
    match backend {
        PlotBackend::Gnuplot => Box::new(GnuplotPlotter::default()),
        PlotBackend::Svg => Box::new(SvgPlotter::default()),
    }
}

fn plot_error(reason: impl Into<String>) -> HarnessError {
    HarnessError::Plot { reason: reason.into() }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Drives an external `gnuplot` process to produce a PNG.
#[derive(Debug, Clone)]
pub struct GnuplotPlotter {
    pub program: String,
    pub width: u32,
    pub height: u32,
}

impl Default for GnuplotPlotter {
    fn default() -> Self {
        GnuplotPlotter {
            program: "gnuplot".to_string(),
            width: 1900,
            height: 1000,
        }
    }
}

impl GnuplotPlotter {
    fn script(&self, request: &PlotRequest) -> String {
        let mut script = String::new();
        let _ = writeln!(script, "set terminal pngcairo size {},{}", self.width, self.height);
        let _ = writeln!(script, "set output '{}'", request.output.display());
        let _ = writeln!(script, "set title '{}'", request.title.replace('\'', ""));
        script.push_str("set xlabel 'Time (s)'\nset ylabel 'Memory (MB)'\n");
        script.push_str("set grid linetype 0\nset key top right box\n");
        script.push_str(
            "plot '-' using 1:2 with lines title 'Heap Size', '-' using 1:2 with lines title 'Heap Extra Size'\n",
        );
        for s in &request.snapshots {
            let _ = writeln!(script, "{} {}", s.time, s.heap_mb);
        }
        script.push_str("e\n");
        for s in &request.snapshots {
            let _ = writeln!(script, "{} {}", s.time, s.heap_extra_mb);
        }
        script.push_str("e\n");
        script
    }
}

impl Plotter for GnuplotPlotter {
    fn extension(&self) -> &'static str {
        "png"
    }

    fn render(&self, request: &PlotRequest) -> Result<()> {
        ensure_parent(&request.output)?;
        let script = self.script(request);

        let mut child = Command::new(&self.program)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| plot_error(format!("cannot start {}: {}", self.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(script.as_bytes())?;
        }
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(plot_error(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        debug!(path = %request.output.display(), "Plot saved");
        Ok(())
    }
}

/// Writes a self-contained SVG line chart.
#[derive(Debug, Clone)]
pub struct SvgPlotter {
    pub width: f64,
    pub height: f64,
}

impl Default for SvgPlotter {
    fn default() -> Self {
        SvgPlotter {
            width: 950.0,
            height: 500.0,
        }
    }
}

const MARGIN: f64 = 60.0;
const HEAP_COLOR: &str = "#1f77b4";
const HEAP_EXTRA_COLOR: &str = "#ff7f0e";

impl SvgPlotter {
    fn svg(&self, request: &PlotRequest) -> String {
        let max_time = request
            .snapshots
            .iter()
            .map(|s| s.time)
            .fold(0.0_f64, f64::max)
            .max(f64::EPSILON);
        let max_mem = request
            .snapshots
            .iter()
            .map(|s| s.heap_mb.max(s.heap_extra_mb))
            .fold(0.0_f64, f64::max)
            .max(f64::EPSILON);

        let plot_w = self.width - 2.0 * MARGIN;
        let plot_h = self.height - 2.0 * MARGIN;
        let x = |t: f64| MARGIN + t / max_time * plot_w;
        let y = |m: f64| self.height - MARGIN - m / max_mem * plot_h;

        let polyline = |value: fn(&Snapshot) -> f64| -> String {
            request
                .snapshots
                .iter()
                .map(|s| format!("{:.2},{:.2}", x(s.time), y(value(s))))
                .collect::<Vec<_>>()
                .join(" ")
        };

        let mut svg = String::new();
        let _ = writeln!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            w = self.width,
            h = self.height
        );
        let _ = writeln!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#);
        let _ = writeln!(
            svg,
            r#"<text x="{}" y="30" text-anchor="middle" font-size="18">{}</text>"#,
            self.width / 2.0,
            escape_xml(&request.title)
        );
        let _ = writeln!(
            svg,
            r#"<line x1="{m}" y1="{b}" x2="{r}" y2="{b}" stroke="black"/><line x1="{m}" y1="{m}" x2="{m}" y2="{b}" stroke="black"/>"#,
            m = MARGIN,
            b = self.height - MARGIN,
            r = self.width - MARGIN
        );
        let _ = writeln!(
            svg,
            r#"<text x="{}" y="{}" text-anchor="middle" font-size="14">Time (s) [max {:.3}]</text>"#,
            self.width / 2.0,
            self.height - 15.0,
            max_time
        );
        let _ = writeln!(
            svg,
            r#"<text x="20" y="{}" font-size="14" transform="rotate(-90 20 {})" text-anchor="middle">Memory (MB) [max {:.3}]</text>"#,
            self.height / 2.0,
            self.height / 2.0,
            max_mem
        );
        for (label, color, value) in [
            ("Heap Size", HEAP_COLOR, (|s: &Snapshot| s.heap_mb) as fn(&Snapshot) -> f64),
            ("Heap Extra Size", HEAP_EXTRA_COLOR, |s: &Snapshot| s.heap_extra_mb),
        ] {
            let _ = writeln!(
                svg,
                r#"<polyline fill="none" stroke="{}" stroke-width="2" points="{}"><title>{}</title></polyline>"#,
                color,
                polyline(value),
                label
            );
        }
        let _ = writeln!(
            svg,
            r#"<text x="{x}" y="{y1}" fill="{c1}" font-size="12" text-anchor="end">Heap Size</text><text x="{x}" y="{y2}" fill="{c2}" font-size="12" text-anchor="end">Heap Extra Size</text>"#,
            x = self.width - MARGIN,
            y1 = MARGIN,
            y2 = MARGIN + 16.0,
            c1 = HEAP_COLOR,
            c2 = HEAP_EXTRA_COLOR
        );
        svg.push_str("</svg>\n");
        svg
    }
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

impl Plotter for SvgPlotter {
    fn extension(&self) -> &'static str {
        "svg"
    }

    fn render(&self, request: &PlotRequest) -> Result<()> {
        ensure_parent(&request.output)?;
        fs::write(&request.output, self.svg(request))?;
        debug!(path = %request.output.display(), "Plot saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn request(output: PathBuf) -> PlotRequest {
        PlotRequest::new(
            "breadth-first",
            "roadNet-PA.txt.gz",
            vec![
                Snapshot { time: 0.1, heap_mb: 2.0, heap_extra_mb: 0.0 },
                Snapshot { time: 0.5, heap_mb: 4.0, heap_extra_mb: 1.0 },
            ],
            output,
        )
    }

    #[test]
    fn test_svg_plot_is_written() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("plots").join("roadNet-PA_breadth-first.svg");
        SvgPlotter::default().render(&request(output.clone())).unwrap();

        let svg = fs::read_to_string(&output).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("Memory Usage Over Time for search breadth-first on roadNet-PA.txt.gz"));
        assert_eq!(svg.matches("<polyline").count(), 2);
    }

    #[test]
    fn test_svg_handles_empty_series() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("empty.svg");
        let mut req = request(output.clone());
        req.snapshots.clear();
        SvgPlotter::default().render(&req).unwrap();
        assert!(output.exists());
    }

    #[test]
    fn test_gnuplot_script_has_both_series() {
        let script = GnuplotPlotter::default().script(&request(PathBuf::from("plots/x.png")));
        assert!(script.contains("set output 'plots/x.png'"));
        assert!(script.contains("0.1 2\n0.5 4\ne\n0.1 0\n0.5 1\ne\n"));
    }

    #[test]
    fn test_backend_extensions() {
        assert_eq!(plotter_for(PlotBackend::Gnuplot).extension(), "png");
        assert_eq!(plotter_for(PlotBackend::Svg).extension(), "svg");
    }
}
