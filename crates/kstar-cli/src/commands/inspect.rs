use crate::cli::InspectArgs;
use crate::error::{CliError, Result};
use bbkstar::core::io::design::DesignDefinition;
use bbkstar::core::sequence::count_sequences;
use bbkstar::core::space::{DesignSpace, StateKind};
use tracing::info;

pub fn run(args: InspectArgs) -> Result<()> {
    info!("Loading design from {:?}", &args.design);
    let design = DesignDefinition::from_path(&args.design).map_err(|e| CliError::FileParsing {
        path: args.design.clone(),
        source: e.into(),
    })?;
    print!(
        "{}",
        describe(&design.space, design.energies.num_terms(), args.max_mutations)
    );
    Ok(())
}

/// Summary of a design: its positions, sequence count and state sizes.
pub fn describe(space: &DesignSpace, num_energy_terms: usize, max_mutations: Option<usize>) -> String {
    let complex = space.complex();
    let mut lines = vec![
        format!("Design '{}'", space.name()),
        String::new(),
        format!(
            "  {:<10} {:<8} {:<6} {:>4}  Residue types",
            "Position", "Strand", "WT", "RCs"
        ),
    ];
    lines.extend(complex.positions().iter().map(|position| {
        format!(
            "  {:<10} {:<8} {:<6} {:>4}  {}",
            position.name(),
            position.strand().to_string(),
            position.wild_type(),
            position.num_rcs(),
            position.res_types().join(" ")
        )
    }));

    let num_sequences = count_sequences(complex, max_mutations);
    lines.push(String::new());
    lines.push(match max_mutations {
        Some(max) => format!("  Sequences (<= {max} mutations): {num_sequences}"),
        None => format!("  Sequences: {num_sequences}"),
    });
    lines.push(format!("  Energy terms: {num_energy_terms}"));
    for kind in [StateKind::Protein, StateKind::Ligand, StateKind::Complex] {
        let state = space.state(kind);
        lines.push(format!(
            "  {:<8} {} position(s), {} conformation(s)",
            kind.as_str(),
            state.num_positions(),
            state.num_conformations()
        ));
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}
