use std::path::{Component, Path, PathBuf};

use super::{DatasetReport, TrialOutcome};

pub const FIGURES_PREAMBLE: &str = "\\documentclass{article}
\\usepackage{graphicx}
\\usepackage{hyperref}
\\usepackage{geometry}
\\geometry{a4paper, margin=1in}
\\title{Heap memory usage of the search algorithms}
\\date{\\today}
\\begin{document}
\\maketitle
\\tableofcontents
\\newpage
\\section{Plots}
The following plots show heap usage over time for each search algorithm on each dataset.
";

pub const FIGURES_END: &str = "\\end{document}\n";

/// Escapes the characters LaTeX treats specially in running text.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '_' | '&' | '%' | '#' | '$' | '{' | '}' => {
                out.push('\\');
                out.push(c);
            }
            '\\' => out.push_str("\\textbackslash{}"),
            '~' => out.push_str("\\textasciitilde{}"),
            '^' => out.push_str("\\textasciicircum{}"),
            _ => out.push(c),
        }
    }
    out
}

/// Path of `target` as seen from a document in `doc_dir`.
pub fn relative_to(doc_dir: &Path, target: &Path) -> PathBuf {
    if target.is_absolute() || doc_dir.is_absolute() {
        return std::env::current_dir()
            .map(|cwd| cwd.join(target))
            .unwrap_or_else(|_| target.to_path_buf());
    }
    let depth = doc_dir
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .count();
    let mut path = PathBuf::new();
    for _ in 0..depth {
        path.push("..");
    }
    path.join(target)
}

/// Section of the results document for one dataset: metadata then the table.
pub fn results_block(report: &DatasetReport) -> String {
    let mut block = format!("\\subsection{{{}}}\n", escape(&report.dataset));

    let metadata = &report.metadata;
    if let Some(graph_type) = &metadata.graph_type {
        block.push_str(&format!("{}\n\n", escape(graph_type)));
    }
    if let Some(load_duration) = &metadata.load_duration {
        block.push_str(&format!("{}\n\n", escape(load_duration)));
    }
    if let Some(endpoints) = &metadata.endpoints {
        block.push_str(&format!(
            "Searched nodes: {} and {}\n\n",
            escape(&endpoints.start),
            escape(&endpoints.end)
        ));
    }

    block.push_str("\\begin{table}[h]\n\\centering\n\\begin{tabular}{|l|l|r|r|r|}\n\\hline\n");
    block.push_str("\\textbf{Algorithm} & \\textbf{Result} & \\textbf{Depth} & \\textbf{Cost} & \\textbf{Time} \\\\\n\\hline\n");
    for record in &report.records {
        match &record.outcome {
            TrialOutcome::Completed(row) => block.push_str(&format!(
                "{} & {} & {} & {} & {} \\\\\n",
                escape(&row.algorithm),
                escape(&row.outcome),
                escape(&row.depth),
                escape(&row.cost),
                escape(&row.time)
            )),
            TrialOutcome::NoResult => {}
            TrialOutcome::Failed { kind, .. } => block.push_str(&format!(
                "{} & \\textit{{failed: {}}} & -- & -- & -- \\\\\n",
                escape(&record.algorithm),
                escape(kind)
            )),
        }
    }
    block.push_str(&format!(
        "\\hline\n\\end{{tabular}}\n\\caption{{{}}}\n\\end{{table}}\n",
        escape(&report.dataset)
    ));
    block
}

/// Section of the figures document for one dataset, one figure per plotted trial.
pub fn figures_block(report: &DatasetReport, doc_dir: &Path) -> String {
    let mut block = format!("\\subsection{{Dataset: {}}}\n", escape(&report.dataset));
    for record in &report.records {
        let Some(plot) = &record.plot else {
            continue;
        };
        block.push_str(&format!(
            "\\subsubsection{{Search algorithm: {}}}\n",
            escape(&record.algorithm)
        ));
        block.push_str("\\begin{figure}[h]\n\\centering\n");
        block.push_str(&format!(
            "\\includegraphics[width=\\textwidth]{{{}}}\n",
            relative_to(doc_dir, plot).display()
        ));
        block.push_str(&format!(
            "\\caption{{Heap usage: {} on {}}}\n\\end{{figure}}\n",
            escape(&record.algorithm),
            escape(&report.dataset)
        ));
    }
    block
}
