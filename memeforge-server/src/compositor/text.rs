//! Caption layout: word wrapping and font size fitting
//!
//! Layout is independent of the rasterizer; widths come from a measuring
//! closure so the fitting logic can be tested with fixed-width metrics.

/// Text block layout at a chosen font size
#[derive(Debug, Clone, PartialEq)]
pub struct FittedText {
    pub size: f32,
    pub lines: Vec<String>,
    pub line_height: f32,
}

impl FittedText {
    pub fn block_height(&self) -> f32 {
        self.line_height * self.lines.len() as f32
    }
}

/// Greedy word wrap to `max_width`
///
/// A single word wider than the line is kept on its own line; fitting then
/// shrinks the font until it fits or the minimum size is reached.
pub fn wrap_text<F>(text: &str, max_width: f32, measure: F) -> Vec<String>
where
    F: Fn(&str) -> f32,
{
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
            continue;
        }

        let candidate = format!("{} {}", current, word);
        if measure(&candidate) <= max_width {
            current = candidate;
        } else {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
        }
    }

    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Largest font size in `[min_size, max_size]` whose wrapped block fits
///
/// `measure(text, size)` returns the rendered width and `line_height(size)`
/// the distance between baselines. Steps down one pixel at a time; when
/// nothing fits the minimum size layout is returned so the caption is still
/// drawn. Returns `None` for blank text.
pub fn fit_text<M, H>(
    text: &str,
    max_width: f32,
    max_height: f32,
    max_size: f32,
    min_size: f32,
    measure: M,
    line_height: H,
) -> Option<FittedText>
where
    M: Fn(&str, f32) -> f32,
    H: Fn(f32) -> f32,
{
    if text.trim().is_empty() {
        return None;
    }

    let layout = |size: f32| {
        let lines = wrap_text(text, max_width, |s| measure(s, size));
        FittedText {
            size,
            lines,
            line_height: line_height(size),
        }
    };

    let mut size = max_size.max(min_size).floor();
    while size > min_size {
        let fitted = layout(size);
        let widest = fitted
            .lines
            .iter()
            .map(|l| measure(l, size))
            .fold(0.0_f32, f32::max);
        if widest <= max_width && fitted.block_height() <= max_height {
            return Some(fitted);
        }
        size -= 1.0;
    }

    Some(layout(min_size))
}
