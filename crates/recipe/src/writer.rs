//! Writer for recipe text.
//!
//! The output is accepted by [`crate::parser`] and parses back into a tree
//! of the same shape.

use crate::types::{ChildBranch, Directive, Recipe, RecipeBranch, TOOL_NAME};
use std::fmt::Write;
use std::path::Path;

/// Write a recipe to a file, creating parent directories.
pub fn write_file(recipe: &Recipe, path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, write_string(recipe))
}

/// Write a recipe to a string.
pub fn write_string(recipe: &Recipe) -> String {
    let mut output = String::new();

    write!(output, "# {TOOL_NAME} format {}", recipe.header.format).unwrap();
    if let Some(template) = &recipe.header.version_template {
        write!(output, " deb-version {template}").unwrap();
    }
    writeln!(output).unwrap();

    write_branch_line(&mut output, &recipe.base);
    write_children(&mut output, &recipe.base.children, 0);

    output
}

fn write_branch_line(output: &mut String, branch: &RecipeBranch) {
    output.push_str(&branch.url);
    write_revspec(output, branch);
    writeln!(output).unwrap();
}

fn write_children(output: &mut String, children: &[ChildBranch], depth: usize) {
    for child in children {
        write!(
            output,
            "{}{} {} {}",
            "  ".repeat(depth),
            child.directive.keyword(),
            child.nickname,
            child.branch.url
        )
        .unwrap();
        if let Directive::Nest { location } = &child.directive {
            write!(output, " {location}").unwrap();
        }
        write_revspec(output, &child.branch);
        writeln!(output).unwrap();

        write_children(output, &child.branch.children, depth + 1);
    }
}

fn write_revspec(output: &mut String, branch: &RecipeBranch) {
    if let Some(token) = branch.revspec.to_token() {
        write!(output, " {token}").unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_string;
    use crate::types::RevisionSpec;

    fn sample() -> Recipe {
        let mut images = RecipeBranch::new("http://images.org")
            .with_revspec(RevisionSpec::RevisionId("img-2".into()));
        images.merge(
            "fixes",
            RecipeBranch::new("http://fixes.org").with_revspec(RevisionSpec::Tag("v2".into())),
        );

        let mut base = RecipeBranch::new("http://base.org");
        base.merge("packaging", RecipeBranch::new("http://packaging.org"));
        base.nest("artwork", "images", images);

        Recipe::new(base).with_version_template("1.0+{revno}")
    }

    #[test]
    fn test_write_header_and_lines() {
        let text = write_string(&sample());
        let expected = "\
# git-build-recipe format 0.4 deb-version 1.0+{revno}
http://base.org
merge packaging http://packaging.org
nest artwork http://images.org images revid:img-2
  merge fixes http://fixes.org tag:v2
";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_write_without_version_template() {
        let recipe = Recipe::new(RecipeBranch::new("http://base.org"));
        assert_eq!(
            write_string(&recipe),
            "# git-build-recipe format 0.4\nhttp://base.org\n"
        );
    }

    #[test]
    fn test_written_recipe_parses_back() {
        let recipe = sample();
        let parsed = parse_string(&write_string(&recipe)).unwrap();
        assert!(!parsed.different_shape_to(&recipe));
        assert_eq!(parsed, recipe);
    }

    #[test]
    fn test_write_file_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("pinned.recipe");
        write_file(&sample(), &path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("# git-build-recipe"));
    }
}
