/// Example: ./sf2_tool info ./banks/*.sf2
/// Example: ./sf2_tool to-xml ./banks/*.sf2 -o unpack
/// Example: ./sf2_tool render ./banks/piano.sf2 -o chord.wav -k 60 -k 64 -k 67

use std::path::PathBuf;

use clap::{command, Parser, Subcommand};
use colored::Colorize;
use indexmap::IndexMap;
use serde::Serialize;

use sfsynth::fileutils::{
    get_final_output_folder, get_input_output_pairs, open_file_overwrite_rw, VERSION,
};
use sfsynth::{OutputMode, Preset, Synth};

#[derive(Parser)]
#[command(author, version = VERSION, about = "Tools for inspecting SoundFont banks and rendering them to audio", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the preset list of one or more SoundFont files
    Info {
        /// Sets the path of the SF2 files to inspect
        #[arg(value_name = "INPUT")]
        input_glob: String,
    },
    /// Dump the compiled preset/region model as XML
    ToXml {
        /// Sets the path of the SF2 files to be dumped
        #[arg(value_name = "INPUT")]
        input_glob: String,

        /// Sets the folder to output the XML files
        #[arg(short = 'o', long, value_name = "OUTPUT")]
        output_folder: Option<PathBuf>,
    },
    /// Play a handful of notes through a bank and write the result as WAV
    Render {
        /// The SF2 file to render with
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output WAV path
        #[arg(short = 'o', long, value_name = "OUTPUT")]
        output: PathBuf,

        /// Preset index to play (see `info` for the list)
        #[arg(short, long, default_value_t = 0)]
        preset: usize,

        /// MIDI key to play; repeat for a chord (default: middle C)
        #[arg(short, long = "key", value_name = "KEY")]
        keys: Vec<u8>,

        /// Note velocity, 0.0 to 1.0
        #[arg(short, long, default_value_t = 1.0)]
        velocity: f32,

        /// Seconds to hold the notes
        #[arg(short, long, default_value_t = 3.0)]
        duration: f32,

        /// Seconds to keep rendering after the notes are released
        #[arg(short, long, default_value_t = 1.0)]
        release: f32,

        /// Output sample rate in Hz
        #[arg(short, long, default_value_t = 44100)]
        sample_rate: u32,

        /// Global gain in dB
        #[arg(short, long, default_value_t = 0.0)]
        gain: f32,

        /// Render a single mixed-down channel instead of stereo
        #[arg(long)]
        mono: bool,
    },
}

#[derive(Serialize)]
#[serde(rename = "soundfont")]
struct FontXml<'a> {
    #[serde(rename = "@file")]
    file: String,
    #[serde(rename = "preset")]
    presets: &'a [Preset],
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Info { input_glob } => {
            let cwd = std::env::current_dir()?;
            for (input_file_path, _) in get_input_output_pairs(input_glob, "sf2", &cwd, "") {
                match Synth::load_file(&input_file_path) {
                    Ok(synth) => {
                        println!(
                            "{} {} ({} presets)",
                            "ok".green().bold(),
                            input_file_path.display(),
                            synth.preset_count()
                        );
                        let mut banks: IndexMap<u16, Vec<&Preset>> = IndexMap::new();
                        for preset in synth.presets() {
                            banks.entry(preset.bank).or_default().push(preset);
                        }
                        for (bank, presets) in &banks {
                            println!("  bank {}", bank);
                            for preset in presets {
                                println!(
                                    "    {:3} {:20} {} regions",
                                    preset.program,
                                    preset.name,
                                    preset.regions.len()
                                );
                            }
                        }
                    }
                    Err(e) => {
                        println!(
                            "{} {}: {}",
                            "failed".red().bold(),
                            input_file_path.display(),
                            e
                        );
                    }
                }
            }
        }
        Commands::ToXml { input_glob, output_folder } => {
            let output_folder = get_final_output_folder(output_folder)?;
            let input_file_paths = get_input_output_pairs(input_glob, "sf2", &output_folder, "sf2.xml");

            for (input_file_path, output_file_path) in input_file_paths {
                print!("Dumping {}... ", input_file_path.display());
                let synth = Synth::load_file(&input_file_path)?;
                let dump = FontXml {
                    file: input_file_path.display().to_string(),
                    presets: synth.presets(),
                };
                let st = quick_xml::se::to_string(&dump)?;
                use std::io::Write;
                open_file_overwrite_rw(output_file_path)?.write_all(st.as_bytes())?;
                println!("{}", "done!".green());
            }

            println!("\nAll files successfully processed.");
        }
        Commands::Render {
            input,
            output,
            preset,
            keys,
            velocity,
            duration,
            release,
            sample_rate,
            gain,
            mono,
        } => {
            let mut synth = Synth::load_file(input)?;
            if *preset >= synth.preset_count() {
                return Err(format!(
                    "preset {} out of range (the bank has {})",
                    preset,
                    synth.preset_count()
                )
                .into());
            }
            let mode = if *mono { OutputMode::Mono } else { OutputMode::StereoInterleaved };
            synth.set_output(mode, *sample_rate, *gain);

            let keys: &[u8] = if keys.is_empty() { &[60] } else { keys };
            for &key in keys {
                synth.note_on(*preset, key, *velocity);
            }
            println!(
                "Rendering {} {} of preset {} ({})...",
                keys.len(),
                if keys.len() == 1 { "note" } else { "notes" },
                preset,
                synth.preset_name(*preset).unwrap_or("?").cyan()
            );

            let channels = mode.channels();
            let held_frames = (*duration * *sample_rate as f32) as usize;
            let tail_frames = (*release * *sample_rate as f32) as usize;
            let mut samples = vec![0i16; (held_frames + tail_frames) * channels];
            synth.render_short(&mut samples[..held_frames * channels], held_frames, false);
            synth.note_off_all();
            synth.render_short(&mut samples[held_frames * channels..], tail_frames, false);

            let spec = hound::WavSpec {
                channels: channels as u16,
                sample_rate: *sample_rate,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            };
            let mut writer = hound::WavWriter::create(output, spec)?;
            for sample in &samples {
                writer.write_sample(*sample)?;
            }
            writer.finalize()?;
            println!("Wrote {}. {}", output.display(), "done!".green());
        }
    }

    Ok(())
}
