use crate::ChunkOffset;
use crate::binxml::name::BinXmlName;
use crate::binxml::value_variant::{BinXmlValue, BinXmlValueType};

use std::fmt::{self, Formatter};
use winstructs::guid::Guid;

#[derive(Debug, PartialOrd, PartialEq, Clone)]
pub enum BinXmlToken {
    FragmentHeader(BinXmlFragmentHeader),
    TemplateInstance(BinXmlTemplateRef),
    OpenStartElement(BinXmlOpenStartElement),
    Attribute(BinXmlAttribute),
    CloseStartElement,
    CloseEmptyElement,
    CloseElement,
    Value(BinXmlValue),
    CDataSection(String),
    CharRef(u16),
    EntityRef(BinXmlName),
    PITarget(BinXmlName),
    PIData(String),
    Substitution(TemplateSubstitutionDescriptor),
    EndOfStream,
}

impl BinXmlToken {
    /// Token name for error messages.
    pub fn name(&self) -> &'static str {
        match self {
            BinXmlToken::FragmentHeader(_) => "FragmentHeader",
            BinXmlToken::TemplateInstance(_) => "TemplateInstance",
            BinXmlToken::OpenStartElement(_) => "OpenStartElement",
            BinXmlToken::Attribute(_) => "Attribute",
            BinXmlToken::CloseStartElement => "CloseStartElement",
            BinXmlToken::CloseEmptyElement => "CloseEmptyElement",
            BinXmlToken::CloseElement => "CloseElement",
            BinXmlToken::Value(_) => "Value",
            BinXmlToken::CDataSection(_) => "CDataSection",
            BinXmlToken::CharRef(_) => "CharRef",
            BinXmlToken::EntityRef(_) => "EntityRef",
            BinXmlToken::PITarget(_) => "PITarget",
            BinXmlToken::PIData(_) => "PIData",
            BinXmlToken::Substitution(_) => "Substitution",
            BinXmlToken::EndOfStream => "EndOfStream",
        }
    }
}

#[derive(Debug, PartialOrd, PartialEq, Eq, Clone)]
pub struct BinXmlOpenStartElement {
    pub data_size: u32,
    pub name: BinXmlName,
}

#[derive(Debug, PartialOrd, PartialEq, Eq, Clone)]
pub struct BinXmlAttribute {
    pub name: BinXmlName,
}

/// Template definition header stored in the chunk template table.
#[derive(Debug, PartialOrd, PartialEq, Clone)]
pub struct BinXmlTemplateDefinitionHeader {
    /// A pointer to the next template in the bucket.
    pub next_template_offset: ChunkOffset,
    pub guid: Guid,
    pub data_size: u32,
}

impl fmt::Display for BinXmlTemplateDefinitionHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<BinXmlTemplateDefinitionHeader - id: {guid}, data_size: {size}>",
            guid = self.guid,
            size = self.data_size
        )
    }
}

/// A template body and the number of values an instance of it must supply.
#[derive(Debug, PartialOrd, PartialEq, Clone)]
pub struct BinXmlTemplateDefinition {
    pub header: BinXmlTemplateDefinitionHeader,
    pub tokens: Vec<BinXmlToken>,
    /// Highest substitution index used by the body, plus one.
    pub slot_count: usize,
}

/// Template instance token payload with its substitution values.
#[derive(Debug, PartialOrd, PartialEq, Clone)]
pub struct BinXmlTemplateRef {
    pub template_id: u32,
    pub template_def_offset: ChunkOffset,
    pub substitutions: Vec<BinXmlValue>,
}

/// Descriptor of a value in a template instance's value array.
#[derive(Debug, PartialOrd, PartialEq, Eq, Clone, Copy)]
pub struct TemplateValueDescriptor {
    pub size: u16,
    pub type_tag: u8,
}

/// Placeholder inside a template body.
#[derive(Debug, PartialOrd, PartialEq, Eq, Clone)]
pub struct TemplateSubstitutionDescriptor {
    // Zero-based (0 is first replacement)
    pub substitution_index: u16,
    pub value_type: Option<BinXmlValueType>,
    /// Optional substitutions are omitted entirely when their value is null.
    pub optional: bool,
}

#[derive(Debug, PartialOrd, PartialEq, Eq, Clone, Copy)]
pub struct BinXmlFragmentHeader {
    pub major_version: u8,
    pub minor_version: u8,
    pub flags: u8,
}
