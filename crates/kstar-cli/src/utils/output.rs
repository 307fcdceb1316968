use crate::error::Result;
use bbkstar::engine::pfunc::PfuncState;
use bbkstar::engine::state::ScoredSequence;
use bbkstar::workflows::analysis::EnsembleConf;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

/// One line of the score table. Bounds are log10 values.
#[derive(Debug, Serialize)]
struct ScoreRow<'a> {
    rank: usize,
    sequence: String,
    status: &'a str,
    kstar_lower: f64,
    kstar_upper: f64,
    protein_z_lower: f64,
    protein_z_upper: f64,
    protein_minimized: usize,
    ligand_z_lower: f64,
    ligand_z_upper: f64,
    ligand_minimized: usize,
    complex_z_lower: f64,
    complex_z_upper: f64,
    complex_minimized: usize,
}

impl<'a> From<&'a ScoredSequence> for ScoreRow<'a> {
    fn from(scored: &'a ScoredSequence) -> Self {
        let z = |state: &PfuncState| (state.bounds.log10_lower(), state.bounds.log10_upper());
        let (protein_z_lower, protein_z_upper) = z(&scored.protein);
        let (ligand_z_lower, ligand_z_upper) = z(&scored.ligand);
        let (complex_z_lower, complex_z_upper) = z(&scored.complex);
        Self {
            rank: scored.rank,
            sequence: scored.sequence.to_string(),
            status: scored.status.as_str(),
            kstar_lower: scored.kstar.log10_lower(),
            kstar_upper: scored.kstar.log10_upper(),
            protein_z_lower,
            protein_z_upper,
            protein_minimized: scored.protein.num_minimized,
            ligand_z_lower,
            ligand_z_upper,
            ligand_minimized: scored.ligand.num_minimized,
            complex_z_lower,
            complex_z_upper,
            complex_minimized: scored.complex.num_minimized,
        }
    }
}

/// Writes the ranking as tab-separated values with a header row.
pub fn write_score_table<W: Write>(writer: W, sequences: &[ScoredSequence]) -> Result<()> {
    let mut table = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(writer);
    for scored in sequences {
        table.serialize(ScoreRow::from(scored))?;
    }
    table.flush()?;
    Ok(())
}

pub fn write_score_table_to_path(path: &Path, sequences: &[ScoredSequence]) -> Result<()> {
    let file = std::fs::File::create(path)?;
    write_score_table(file, sequences)
}

/// Renders the ranking for the terminal.
pub fn format_ranking(sequences: &[ScoredSequence]) -> String {
    let width = sequences
        .iter()
        .map(|s| s.sequence.to_string().len())
        .max()
        .unwrap_or(0)
        .max("Sequence".len());

    let mut out = format!(
        "{:>4}  {:<width$}  {:>21}  {}\n",
        "Rank", "Sequence", "log10 K*", "Status"
    );
    for scored in sequences {
        let marker = if scored.is_converged() { "" } else { " *" };
        out.push_str(&format!(
            "{:>4}  {:<width$}  {:>21}  {}{}\n",
            scored.rank,
            scored.sequence.to_string(),
            scored.kstar.to_string(),
            scored.status,
            marker
        ));
    }
    out
}

pub fn format_ensemble(confs: &[EnsembleConf]) -> String {
    let mut out = String::new();
    for (i, conf) in confs.iter().enumerate() {
        let minimized = conf
            .minimized_energy
            .map(|e| format!("{:.4}", e))
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "    {:>3}. {:>10.4} {:>10}  {}\n",
            i + 1,
            conf.lower_bound,
            minimized,
            conf.labels.join(" ")
        ));
    }
    out
}
