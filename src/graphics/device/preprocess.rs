use vecmap::VecSet;
use derive_more::*;

/// Flags used while preprocessing WGSL program sources.
/// Determines if `#ifdef` / `#ifndef` / `#else` blocks are kept or stripped out.
pub struct ShaderDefs(VecSet<String>);

impl ShaderDefs {

    pub fn new() -> Self {
        Self(VecSet::new())
    }

    pub fn add(&mut self, def: impl Into<String>) {
        self.0.insert(def.into());
    }

    pub fn is_defined(&self, def: impl AsRef<str>) -> bool {
        self.0.contains(def.as_ref())
    }

    /**
     * Strips out conditional blocks whose condition does not hold.
     * Directive lines themselves never appear in the output.
     */
    pub fn preprocess(&self, source: &str) -> Result<String, PreprocessError> {
        let mut output = String::with_capacity(source.len());
        let mut blocks: Vec<Block> = Vec::new();
        for (index, line) in source.lines().enumerate() {
            let line_num = index as u32 + 1;
            let trimmed = line.trim();
            if !trimmed.starts_with('#') {
                if blocks.iter().all(|block| block.active) {
                    output.push_str(line);
                    output.push('\n');
                }
                continue;
            }
            let (directive, param) = trimmed.split_once(' ').unwrap_or((trimmed, ""));
            let param = param.trim();
            match directive {
                "#ifdef" | "#ifndef" => {
                    if param.is_empty() {
                        return Err(PreprocessError::new(line_num, PreprocessErrorKind::MissingParam));
                    }
                    let defined = self.is_defined(param);
                    let active = if directive == "#ifdef" { defined } else { !defined };
                    blocks.push(Block { active, in_else: false });
                },
                "#else" => {
                    let Some(block) = blocks.last_mut() else {
                        return Err(PreprocessError::new(line_num, PreprocessErrorKind::NotInsideBlock));
                    };
                    if block.in_else {
                        return Err(PreprocessError::new(line_num, PreprocessErrorKind::DuplicateElse));
                    }
                    block.active = !block.active;
                    block.in_else = true;
                },
                "#endif" => {
                    if !param.is_empty() {
                        return Err(PreprocessError::new(line_num, PreprocessErrorKind::UnexpectedParam));
                    }
                    if blocks.pop().is_none() {
                        return Err(PreprocessError::new(line_num, PreprocessErrorKind::NotInsideBlock));
                    }
                },
                _ => return Err(PreprocessError::new(line_num, PreprocessErrorKind::InvalidDirective)),
            }
        }
        if !blocks.is_empty() {
            let line_num = source.lines().count() as u32;
            return Err(PreprocessError::new(line_num, PreprocessErrorKind::MissingEndif));
        }
        Ok(output)
    }
}

impl Default for ShaderDefs {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Into<String>> FromIterator<S> for ShaderDefs {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut defs = ShaderDefs::new();
        for def in iter {
            defs.add(def);
        }
        defs
    }
}

struct Block {
    active: bool,
    in_else: bool,
}

#[derive(Error, Copy, Clone, Eq, PartialEq, Display, Debug)]
#[display(fmt="Preprocessing error on line {line_num}: {kind}")]
pub struct PreprocessError {
    pub line_num: u32,
    pub kind: PreprocessErrorKind,
}

impl PreprocessError {
    pub fn new(line_num: u32, kind: PreprocessErrorKind) -> Self {
        Self { line_num, kind }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Display, Debug)]
pub enum PreprocessErrorKind {
    #[display(fmt="Invalid directive")]
    InvalidDirective,
    #[display(fmt="Directive is missing its parameter")]
    MissingParam,
    #[display(fmt="Unexpected parameter")]
    UnexpectedParam,
    #[display(fmt="Not inside of an #ifdef or #ifndef block")]
    NotInsideBlock,
    #[display(fmt="Block already has an #else")]
    DuplicateElse,
    #[display(fmt="Missing #endif at the end of the source")]
    MissingEndif,
}


#[cfg(test)]
mod test {
    use crate::{PreprocessError, PreprocessErrorKind, ShaderDefs};

    #[test]
    fn ifdef_else() {
        let source =
"struct Vertex {
#ifdef UV
    uv: vec2<f32>,
#else
    pad: f32,
#endif
}";
        let defs: ShaderDefs = ["UV"].into_iter().collect();
        let expected =
"struct Vertex {
    uv: vec2<f32>,
}
";
        assert_eq!(Ok(expected.to_owned()), defs.preprocess(source));

        let defs = ShaderDefs::new();
        let expected =
"struct Vertex {
    pad: f32,
}
";
        assert_eq!(Ok(expected.to_owned()), defs.preprocess(source));
    }

    #[test]
    fn nested_ifndef() {
        let source =
"a
#ifndef HERP
  #ifdef DERP
b
  #endif
#endif
c";
        let defs: ShaderDefs = ["DERP"].into_iter().collect();
        assert_eq!(Ok("a\nb\nc\n".to_owned()), defs.preprocess(source));
    }

    #[test]
    fn unbalanced_blocks() {
        let defs = ShaderDefs::new();
        assert_eq!(
            Err(PreprocessError::new(2, PreprocessErrorKind::NotInsideBlock)),
            defs.preprocess("a\n#endif")
        );
        assert_eq!(
            Err(PreprocessError::new(2, PreprocessErrorKind::MissingEndif)),
            defs.preprocess("#ifdef A\nb")
        );
        assert_eq!(
            Err(PreprocessError::new(1, PreprocessErrorKind::InvalidDirective)),
            defs.preprocess("#include foo")
        );
    }
}
