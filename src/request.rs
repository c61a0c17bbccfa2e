//! Compile requests handed over by the source generator.

use crate::reference::DependencyDescriptor;

/// Namespace used when the generator does not pick one.
pub const DYNAMIC_TEMPLATE_NAMESPACE: &str = "CompiledTemplates";

/// Everything needed for one compilation attempt.
///
/// A request is immutable once built; the builder methods consume and
/// return it so a generator can assemble one in a single expression.
#[derive(Debug)]
pub struct CompileRequest {
    pub class_name: String,
    pub namespace: String,
    pub source: String,
    pub references: Vec<DependencyDescriptor>,
    /// Raw backend arguments, passed through in order
    pub options: Vec<String>,
    /// Template text before generation, only kept for error reports
    pub template_content: Option<String>,
}

impl CompileRequest {
    pub fn new(class_name: impl Into<String>, source: impl Into<String>) -> Self {
        CompileRequest {
            class_name: class_name.into(),
            namespace: DYNAMIC_TEMPLATE_NAMESPACE.to_string(),
            source: source.into(),
            references: Vec::new(),
            options: Vec::new(),
            template_content: None,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_reference(mut self, reference: DependencyDescriptor) -> Self {
        self.references.push(reference);
        self
    }

    pub fn with_references(mut self, references: impl IntoIterator<Item = DependencyDescriptor>) -> Self {
        self.references.extend(references);
        self
    }

    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }

    pub fn with_template_content(mut self, template: impl Into<String>) -> Self {
        self.template_content = Some(template.into());
        self
    }

    /// `{namespace}.{ClassName}`, the name the loaded symbol is resolved by.
    pub fn qualified_name(&self) -> String {
        if self.namespace.is_empty() {
            self.class_name.clone()
        } else {
            format!("{}.{}", self.namespace, self.class_name)
        }
    }
}
