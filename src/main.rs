//! certforge – command-line batch certificate renderer.
//!
//! Usage:
//!   certforge <template> <names.csv> [output.zip|-] [--settings JSON]
//!             [--font-size N] [--font-family NAME] [-x N] [-y N]
//!             [--fonts-dir DIR] [--skip-header] [--consume-inputs]
//!   certforge --list-fonts [--fonts-dir DIR]
//!
//! If `output.zip` is omitted the archive is written to `certificates.zip` in
//! the current directory; `-` streams it to stdout.

use std::{env, fs, io, path::PathBuf, process};

use certforge::archive::ARCHIVE_FILE_NAME;
use certforge::{BatchInputs, Pipeline, PipelineConfig, RenderSettings};

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    let mut positional: Vec<PathBuf> = Vec::new();
    let mut settings_json: Option<String> = None;
    let mut overrides = SettingsOverrides::default();
    let mut config = PipelineConfig {
        release_inputs: false,
        ..PipelineConfig::default()
    };

    let mut list_fonts = false;

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--settings" | "-s" => settings_json = Some(value(&mut iter, arg, &args[0])),
            "--font-size" => overrides.font_size = Some(number(&mut iter, arg, &args[0])),
            "--font-family" | "-f" => overrides.font_family = Some(value(&mut iter, arg, &args[0])),
            "-x" => overrides.x = Some(number(&mut iter, arg, &args[0])),
            "-y" => overrides.y = Some(number(&mut iter, arg, &args[0])),
            "--fonts-dir" => config.fonts_dir = Some(PathBuf::from(value(&mut iter, arg, &args[0]))),
            "--skip-header" => config.skip_header = true,
            "--consume-inputs" => config.release_inputs = true,
            "--list-fonts" => list_fonts = true,
            "--help" | "-h" => {
                print_usage(&args[0]);
                process::exit(0);
            }
            "-" => positional.push(PathBuf::from("-")),
            other if other.starts_with('-') => {
                eprintln!("Unknown flag: {other}");
                print_usage(&args[0]);
                process::exit(1);
            }
            path => positional.push(PathBuf::from(path)),
        }
    }

    if list_fonts {
        let pipeline = Pipeline::new(config);
        for family in pipeline.fonts().families() {
            println!("{family}");
        }
        return;
    }

    if positional.len() < 2 || positional.len() > 3 {
        eprintln!("Error: expected a template, a names file and an optional output path.");
        print_usage(&args[0]);
        process::exit(1);
    }

    let base = match settings_json {
        Some(json) => match RenderSettings::from_json(&json) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("Error: {}", e.public_message());
                process::exit(1);
            }
        },
        None => RenderSettings::default(),
    };
    let settings = overrides.apply(base);

    let output = positional
        .get(2)
        .cloned()
        .unwrap_or_else(|| PathBuf::from(ARCHIVE_FILE_NAME));
    let inputs = BatchInputs::new(positional[0].clone(), positional[1].clone());
    let pipeline = Pipeline::new(config);

    let result = if output.as_os_str() == "-" {
        pipeline.run(inputs, settings, || Ok(io::BufWriter::new(io::stdout().lock())))
    } else {
        pipeline.run(inputs, settings, || {
            if let Some(parent) = output.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            fs::File::create(&output).map(io::BufWriter::new)
        })
    };

    match result {
        Ok(report) => {
            let n = report.entries.len();
            eprintln!(
                "Wrote '{}' ({} bytes, {} certificate{})",
                output.display(),
                report.bytes_written,
                n,
                if n == 1 { "" } else { "s" }
            );
        }
        Err(e) => {
            if e.is_validation() {
                eprintln!("Error: {}", e.public_message());
            } else {
                eprintln!("Error generating certificates: {e}");
            }
            process::exit(1);
        }
    }
}

/// Individual setting flags; they win over `--settings` regardless of order.
#[derive(Default)]
struct SettingsOverrides {
    font_size: Option<f32>,
    font_family: Option<String>,
    x: Option<f32>,
    y: Option<f32>,
}

impl SettingsOverrides {
    fn apply(self, mut settings: RenderSettings) -> RenderSettings {
        if let Some(font_size) = self.font_size {
            settings.font_size = font_size;
        }
        if let Some(font_family) = self.font_family {
            settings.font_family = font_family;
        }
        if let Some(x) = self.x {
            settings.x = x;
        }
        if let Some(y) = self.y {
            settings.y = y;
        }
        settings
    }
}

fn value<'a>(iter: &mut impl Iterator<Item = &'a String>, flag: &str, prog: &str) -> String {
    match iter.next() {
        Some(v) => v.clone(),
        None => {
            eprintln!("Missing value for {flag}");
            print_usage(prog);
            process::exit(1);
        }
    }
}

fn number<'a>(iter: &mut impl Iterator<Item = &'a String>, flag: &str, prog: &str) -> f32 {
    let raw = value(iter, flag, prog);
    match raw.trim().parse() {
        Ok(n) => n,
        Err(_) => {
            eprintln!("Expected a number for {flag}, got {raw:?}");
            process::exit(1);
        }
    }
}

fn print_usage(prog: &str) {
    eprintln!("certforge – batch certificate renderer");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  {prog} <template> <names.csv> [output.zip|-] [options]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  <template>     PNG/JPEG/GIF/BMP/WebP image, at most 500x500 px");
    eprintln!("  <names.csv>    CSV file; the first column of every row is a name");
    eprintln!("  [output.zip]   Output path (default: {ARCHIVE_FILE_NAME}; '-' for stdout)");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --settings, -s JSON     {{\"fontSize\":24,\"fontFamily\":\"Arial\",\"x\":50,\"y\":280}}");
    eprintln!("                         (individual flags below override its fields)");
    eprintln!("  --font-size N          Font size in px (default: 24)");
    eprintln!("  --font-family, -f NAME Font family (default: Arial)");
    eprintln!("  -x N, -y N             Text position; y is the baseline (text top = y - size)");
    eprintln!("  --fonts-dir DIR        Extra directory of TTF/OTF fonts");
    eprintln!("  --skip-header          Treat the first CSV row as a header");
    eprintln!("  --consume-inputs       Delete the template and CSV when done");
    eprintln!("  --list-fonts           Print the font families that can be used");
    eprintln!("  --help                 Print this message");
}
