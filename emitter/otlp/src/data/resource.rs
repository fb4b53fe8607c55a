use sval_derive::Value;

use super::KeyValue;

#[derive(Value)]
pub struct Resource<'a> {
    #[sval(label = "attributes", index = 1)]
    pub attributes: Vec<KeyValue<'a>>,
}

impl<'a> From<&'a tally::Resource> for Resource<'a> {
    fn from(resource: &'a tally::Resource) -> Self {
        Resource {
            attributes: super::key_values(resource.attributes()),
        }
    }
}
