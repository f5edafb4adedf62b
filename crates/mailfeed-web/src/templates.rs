//! Template Engine
//!
//! Handles HTML template rendering using minijinja. Template names end in
//! `.html` so interpolated values are auto-escaped.

use minijinja::{Environment, Error as MiniJinjaError};

/// Template manager
pub struct Templates {
    env: Environment<'static>,
}

impl Templates {
    /// Create a new template manager
    pub fn new() -> Result<Self, MiniJinjaError> {
        let mut env = Environment::new();

        env.add_template("base.html", include_str!("../templates/base.html"))?;
        env.add_template("index.html", include_str!("../templates/index.html"))?;
        env.add_template("created.html", include_str!("../templates/created.html"))?;

        Ok(Self { env })
    }

    /// Render a template with context
    pub fn render(&self, name: &str, context: &serde_json::Value) -> Result<String, MiniJinjaError> {
        let template = self.env.get_template(name)?;
        template.render(context)
    }
}
