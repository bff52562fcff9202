//! The `synth` command: direct mesh synthesis through a text model

use anyhow::Result;
use kiln_gen::config::KilnConfig;
use kiln_gen::{ChatCompletionsModel, DirectSynthesizer};

pub fn run(prompt: &str, output: &str) -> Result<()> {
    let config = KilnConfig::load()?;
    let model = ChatCompletionsModel::from_config(&config)?;
    let synthesizer = DirectSynthesizer::new(Box::new(model));

    println!("Synthesizing mesh for \"{}\"...", prompt.trim());
    let mesh = synthesizer.synthesize(prompt)?;
    mesh.write_obj(output)?;

    println!(
        "  Wrote {} ({} vertices, {} triangles)",
        output,
        mesh.vertex_count(),
        mesh.triangle_count()
    );
    Ok(())
}
