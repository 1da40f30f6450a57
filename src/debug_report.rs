use parley::{MatchMetrics, ReplyDetails};

mod ansi {
    pub const RESET: &str = "\x1b[0m";
    pub const DIM: &str = "\x1b[2m";
    pub const BOLD: &str = "\x1b[1m";

    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const BLUE: &str = "\x1b[34m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GRAY: &str = "\x1b[90m";

    pub struct Palette {
        enabled: bool,
    }

    impl Palette {
        pub fn new(enabled: bool) -> Self {
            Self { enabled }
        }

        pub fn paint(&self, s: impl AsRef<str>, color: &str) -> String {
            if self.enabled { format!("{}{}{}", color, s.as_ref(), RESET) } else { s.as_ref().to_string() }
        }

        pub fn bold(&self, s: impl AsRef<str>) -> String {
            if self.enabled { format!("{}{}{}", BOLD, s.as_ref(), RESET) } else { s.as_ref().to_string() }
        }

        pub fn dim(&self, s: impl AsRef<str>) -> String {
            if self.enabled { format!("{}{}{}", DIM, s.as_ref(), RESET) } else { s.as_ref().to_string() }
        }
    }
}

pub fn print_reply(input: &str, details: &ReplyDetails, color: bool) {
    let palette = ansi::Palette::new(color);
    println!("\n{}", palette.bold(palette.paint(format!("⚙  Input: \"{}\"", input), ansi::CYAN)));

    println!("\n{}", palette.paint("━━━ Gating ━━━", ansi::GRAY));
    print_gating(&details.metrics, &palette);

    println!("\n{}", palette.paint("━━━ Match ━━━", ansi::GRAY));
    match &details.rule {
        Some(pattern) => {
            let line = details.line.map(|l| format!("line {l}")).unwrap_or_default();
            println!("  {} {}", palette.bold(palette.paint(format!("+ {pattern}"), ansi::GREEN)), palette.dim(line));
            for (idx, capture) in details.captures.iter().enumerate() {
                println!(
                    "    {} {}",
                    palette.paint(format!("<star{}>", idx + 1), ansi::BLUE),
                    palette.paint(format!("\"{capture}\""), ansi::YELLOW)
                );
            }
        }
        None => {
            println!("{}", palette.dim("  No trigger matched; fallback used"));
            println!("\n{}", palette.paint("Possible reasons:", ansi::YELLOW));
            println!("  • No rule is anchored on a word of the input");
            println!("  • A `#` or `_` wildcard found no digit-only or alphabetic word");
            println!("  • The input is shorter than every candidate trigger");
            println!("\n{}", palette.dim("  Tip: Set PARLEY_LOG=parley=trace to see alignment attempts"));
        }
    }

    println!("\n{}", palette.paint("━━━ Reply ━━━", ansi::GRAY));
    println!("  {}", palette.bold(&details.reply));

    println!("\n{}", palette.paint("━━━ Timing ━━━", ansi::GRAY));
    println!(
        "  Match: {}  │  Generation: {}",
        palette.paint(format!("{:?}", details.metrics.total), ansi::GREEN),
        palette.dim(details.generation.to_string()),
    );
    println!();
}

fn print_gating(metrics: &MatchMetrics, palette: &ansi::Palette) {
    let stages = [
        ("rules", metrics.rules_total),
        ("indexed", metrics.indexed),
        ("prefiltered", metrics.prefiltered),
        ("aligned", metrics.alignments),
    ];
    for (label, count) in stages {
        let count = if count > 0 {
            palette.paint(count.to_string(), ansi::GREEN)
        } else {
            palette.dim(count.to_string())
        };
        println!("  {} {}", palette.paint(format!("{label:>12}:"), ansi::BLUE), count);
    }
}
