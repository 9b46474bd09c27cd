//! Doctor command - check external tools and configured paths.

use std::time::Duration;

use console::style;

use crate::config::Settings;
use crate::recognition::{PopplerBackend, TesseractEngine};

fn report(ok: bool, label: &str, detail: &str) {
    let mark = if ok {
        style("ok").green().bold()
    } else {
        style("missing").red().bold()
    };
    println!("  {mark:>9}  {label:<14} {}", style(detail).dim());
}

/// Returns an error when anything required is missing.
pub fn run(settings: &Settings) -> anyhow::Result<()> {
    let recognition = &settings.recognition;
    let timeout = Duration::from_secs(recognition.engine_timeout_secs.max(1));
    let mut healthy = true;

    println!("{}", style("External tools").cyan().bold());
    let poppler = PopplerBackend::new(recognition.poppler_dir.clone(), timeout);
    for (tool, available) in poppler.probe() {
        healthy &= available;
        let location = recognition
            .poppler_dir
            .as_ref()
            .map(|dir| dir.display().to_string())
            .unwrap_or_else(|| "PATH".to_string());
        report(available, tool, &location);
    }

    let engine = TesseractEngine::new(&recognition.tesseract, timeout);
    let engine_ok = engine.is_available();
    healthy &= engine_ok;
    report(engine_ok, "tesseract", &recognition.tesseract.display().to_string());

    if engine_ok {
        println!("{}", style("Languages").cyan().bold());
        let installed = engine.installed_languages().unwrap_or_else(|e| {
            eprintln!("  Cannot list languages: {e}");
            Vec::new()
        });
        for lang in recognition.languages.iter().flat_map(|l| l.split('+')) {
            let ok = installed.iter().any(|i| i == lang);
            healthy &= ok;
            report(ok, lang, "traineddata");
        }
    }

    println!("{}", style("Configuration").cyan().bold());
    match settings.validate() {
        Ok(paths) => {
            report(true, "watch root", &paths.watch_root.display().to_string());
            report(true, "output root", &paths.output_root.display().to_string());
            report(true, "error dir", &paths.error_dir.display().to_string());
            report(true, "queue", &paths.queue_dir.display().to_string());
        }
        Err(e) => {
            healthy = false;
            report(false, "settings", &e.to_string());
        }
    }

    if healthy {
        println!("\n{}", style("Ready.").green().bold());
        Ok(())
    } else {
        anyhow::bail!("some checks failed")
    }
}
