use std::sync::LazyLock;

use lsp_types::{Position, Range};
use regex::Regex;
use tree_sitter::{Node, Point};

use crate::{
    error::LSError,
    php::{Test, TestKind},
};

static DOC_TEST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@test\b").expect("valid @test pattern"));
static DOC_DATA_PROVIDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@dataProvider\s+\S").expect("valid @dataProvider pattern"));
static DOC_DEPENDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@depends\s+(?:(?:clone|shallowClone)\s+)?(?:[\w\\]+::)?(\w+)")
        .expect("valid @depends pattern")
});
static ATTR_TEST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[\s\[,\\])Test\s*[\],(]").expect("valid #[Test] pattern"));
static ATTR_DATA_PROVIDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bDataProvider(?:External)?\s*\(").expect("valid #[DataProvider] pattern")
});
static ATTR_DEPENDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bDepends(?:UsingDeepClone|UsingShallowClone)?\s*\(\s*['"](\w+)['"]"#)
        .expect("valid #[Depends] pattern")
});

fn position(point: Point) -> Position {
    Position {
        line: point.row as u32,
        character: point.column as u32,
    }
}

fn node_range(node: Node) -> Range {
    Range {
        start: position(node.start_position()),
        end: position(node.end_position()),
    }
}

fn text<'a>(node: Node, source: &'a [u8]) -> &'a str {
    node.utf8_text(source).unwrap_or("")
}

fn field_text(node: Node, field: &str, source: &[u8]) -> String {
    node.child_by_field_name(field)
        .map(|child| text(child, source).to_string())
        .unwrap_or_default()
}

fn has_child_kind(node: Node, kind: &str) -> bool {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).any(|child| child.kind() == kind);
    found
}

/// Doc comment directly above a declaration.
fn doc_comment<'a>(node: Node, source: &'a [u8]) -> &'a str {
    node.prev_named_sibling()
        .filter(|sibling| sibling.kind() == "comment")
        .map(|comment| text(comment, source))
        .filter(|comment| comment.starts_with("/**"))
        .unwrap_or("")
}

fn attributes<'a>(node: Node, source: &'a [u8]) -> &'a str {
    let mut cursor = node.walk();
    let list = node
        .children(&mut cursor)
        .find(|child| child.kind() == "attribute_list");
    list.map(|list| text(list, source)).unwrap_or("")
}

struct Discovery<'a> {
    path: &'a str,
    source: &'a [u8],
    tests: Vec<Test>,
}

impl Discovery<'_> {
    fn walk(&mut self, node: Node, namespace: &mut String) {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();
        for child in children {
            match child.kind() {
                "namespace_definition" => {
                    let name = field_text(child, "name", self.source);
                    match child.child_by_field_name("body") {
                        Some(body) => self.walk(body, &mut name.clone()),
                        None => *namespace = name,
                    }
                }
                "class_declaration" => self.class(child, namespace),
                _ => {}
            }
        }
    }

    fn class(&mut self, node: Node, namespace: &str) {
        let class = field_text(node, "name", self.source);
        let extends_test_case = {
            let mut cursor = node.walk();
            let base = node
                .children(&mut cursor)
                .find(|child| child.kind() == "base_clause");
            base.is_some_and(|base| text(base, self.source).contains("TestCase"))
        };
        if class.is_empty()
            || has_child_kind(node, "abstract_modifier")
            || !(class.ends_with("Test") || extends_test_case)
        {
            return;
        }

        let qualified = if namespace.is_empty() {
            class.clone()
        } else {
            format!("{namespace}\\{class}")
        };
        self.tests.push(Test {
            kind: TestKind::Class,
            name: qualified.clone(),
            namespace: namespace.to_string(),
            class: class.clone(),
            method: String::new(),
            path: self.path.to_string(),
            range: node_range(node),
            depends: Vec::new(),
        });

        let Some(body) = node.child_by_field_name("body") else {
            return;
        };
        let mut cursor = body.walk();
        let methods: Vec<Node> = body
            .named_children(&mut cursor)
            .filter(|child| child.kind() == "method_declaration")
            .collect();
        for method in methods {
            if let Some(test) = self.method(method, namespace, &class, &qualified) {
                self.tests.push(test);
            }
        }
    }

    fn method(&self, node: Node, namespace: &str, class: &str, qualified: &str) -> Option<Test> {
        let name = field_text(node, "name", self.source);
        let mut cursor = node.walk();
        let visibility = node
            .children(&mut cursor)
            .find(|child| child.kind() == "visibility_modifier")
            .map(|modifier| text(modifier, self.source).to_lowercase());
        if visibility.is_some_and(|visibility| visibility != "public")
            || has_child_kind(node, "abstract_modifier")
        {
            return None;
        }

        let doc = doc_comment(node, self.source);
        let attributes = attributes(node, self.source);
        let provided = DOC_DATA_PROVIDER.is_match(doc) || ATTR_DATA_PROVIDER.is_match(attributes);
        let is_test = provided
            || name.starts_with("test")
            || DOC_TEST.is_match(doc)
            || ATTR_TEST.is_match(attributes);
        if !is_test {
            return None;
        }

        let kind = if provided {
            TestKind::DataProvider
        } else {
            TestKind::Method
        };
        let mut depends: Vec<String> = Vec::new();
        for name in DOC_DEPENDS
            .captures_iter(doc)
            .chain(ATTR_DEPENDS.captures_iter(attributes))
            .filter_map(|captures| captures.get(1))
            .map(|m| m.as_str().to_string())
        {
            if !depends.contains(&name) {
                depends.push(name);
            }
        }

        Some(Test {
            kind,
            name: format!("{qualified}::{name}"),
            namespace: namespace.to_string(),
            class: class.to_string(),
            method: name,
            path: self.path.to_string(),
            range: node_range(node),
            depends,
        })
    }
}

/// Find the test classes and test methods declared in PHP source text, in
/// declaration order.
pub fn discover_source(path: &str, source_code: &str) -> Result<Vec<Test>, LSError> {
    let mut parser = tree_sitter::Parser::new();
    let language = tree_sitter_php::language_php();
    parser.set_language(&language)?;

    let tree = parser
        .parse(source_code, None)
        .ok_or(LSError::TreeSitterParse)?;

    let mut discovery = Discovery {
        path,
        source: source_code.as_bytes(),
        tests: Vec::new(),
    };
    discovery.walk(tree.root_node(), &mut String::new());
    Ok(discovery.tests)
}
