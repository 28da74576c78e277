//! Terminal deck player.
//!
//! Loads a slide deck from a JSON file (an array of slide descriptors) and
//! plays it through: each slide is displayed, every main-sequence effect is
//! advanced in turn, and the scheduler runs between steps so timed effects
//! complete in real time.
//!
//! ```text
//! show-player deck.json
//! ```

use std::cell::Cell;
use std::rc::Rc;

use anyhow::{Context, Result};
use slideshow::{SlideDescriptor, SlideShowHandler, SystemTimeSource};

fn main() -> Result<()> {
    env_logger::init();

    let path = std::env::args()
        .nth(1)
        .context("usage: show-player <deck.json>")?;
    let text =
        std::fs::read_to_string(&path).with_context(|| format!("failed to read {path}"))?;
    let slides: Vec<SlideDescriptor> =
        serde_json::from_str(&text).with_context(|| format!("failed to parse {path}"))?;
    if slides.is_empty() {
        anyhow::bail!("{path}: deck has no slides");
    }
    let slide_count = slides.len();

    let handler = SlideShowHandler::new(slides, Rc::new(SystemTimeSource::new()));
    let finished = Rc::new(Cell::new(false));
    let flag = Rc::clone(&finished);
    handler.set_exit_hook(move || flag.set(true));

    println!("playing {slide_count} slide(s) from {path}");
    handler.display_slide(0, false);
    while !finished.get() {
        handler.run_loop();
        if finished.get() {
            break;
        }
        if handler.next_effect() {
            println!(
                "slide {} effect {}",
                handler.current_slide().map_or(0, |slide| slide + 1),
                handler.current_effect()
            );
        } else {
            // Main sequence exhausted; move on.
            let next = handler.current_slide().map_or(0, |slide| slide + 1);
            if next < slide_count {
                println!("slide {}", next + 1);
            }
            handler.display_slide(next, false);
        }
    }
    println!("done");
    Ok(())
}
