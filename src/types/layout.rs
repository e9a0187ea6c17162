use super::{GeneralType, StructId, StructType, TypeArguments, TypeError};
use crate::lang::Location;

/// The one platform parameter the type model needs.
pub trait RuntimeInfoProvider {
    fn pointer_size(&self) -> u32;
}

/// Gives layout queries access to struct definitions by identity.
pub trait LayoutProvider: RuntimeInfoProvider {
    fn struct_template_parameters(&self, id: StructId) -> &[String];
    fn struct_fields(&self, id: StructId) -> &[CompiledField];
}

/// A resolved struct field. Its type may mention the struct's own
/// template parameters.
#[derive(Debug, Clone)]
pub struct CompiledField {
    pub name: String,
    pub ty: GeneralType,
    pub location: Location,
}

/// A field of a concrete instantiation with its byte offset.
#[derive(Debug, Clone)]
pub struct FieldOffset {
    pub name: String,
    pub ty: GeneralType,
    pub offset: u32,
    pub size: u32,
}

impl StructType {
    /// Substitutes this instantiation's arguments into a field type.
    ///
    /// Fails with "Type argument not found" if `ty` mentions a parameter
    /// the struct does not declare or has no argument for.
    pub fn replace_type(
        &self,
        ty: &GeneralType,
        layout: &dyn LayoutProvider,
    ) -> Result<GeneralType, TypeError> {
        if !ty.contains_generic() {
            return Ok(ty.clone());
        }
        let declared = layout.struct_template_parameters(self.id);
        let own: TypeArguments = self
            .type_arguments
            .iter()
            .filter(|(name, _)| declared.iter().any(|d| d == *name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        ty.substitute(&own)
    }

    /// Fields in declaration order with cumulative offsets.
    pub fn fields(&self, layout: &dyn LayoutProvider) -> Result<Vec<FieldOffset>, TypeError> {
        self.fields_at_depth(layout, 0)
    }

    fn fields_at_depth(
        &self,
        layout: &dyn LayoutProvider,
        depth: u32,
    ) -> Result<Vec<FieldOffset>, TypeError> {
        let mut offset = 0;
        let mut result = Vec::new();
        for field in layout.struct_fields(self.id) {
            let ty = self.replace_type(&field.ty, layout)?;
            let size = ty.size_at_depth(layout, depth)?;
            result.push(FieldOffset {
                name: field.name.clone(),
                ty,
                offset,
                size,
            });
            offset = offset
                .checked_add(size)
                .ok_or_else(|| TypeError::too_large(self.name.clone()))?;
        }
        Ok(result)
    }

    pub fn field(&self, name: &str, layout: &dyn LayoutProvider) -> Result<FieldOffset, TypeError> {
        self.fields(layout)?
            .into_iter()
            .find(|f| f.name == name)
            .ok_or_else(|| TypeError::field_not_found(self.name.clone(), name))
    }

    /// Scans fields in declaration order, summing the sizes before `name`.
    pub fn field_offset(&self, name: &str, layout: &dyn LayoutProvider) -> Result<u32, TypeError> {
        let mut offset = 0;
        for field in layout.struct_fields(self.id) {
            if field.name == name {
                return Ok(offset);
            }
            let size = self.replace_type(&field.ty, layout)?.size(layout)?;
            offset = offset
                .checked_add(size)
                .ok_or_else(|| TypeError::too_large(self.name.clone()))?;
        }
        Err(TypeError::field_not_found(self.name.clone(), name))
    }

    pub fn size(&self, layout: &dyn LayoutProvider) -> Result<u32, TypeError> {
        self.size_at_depth(layout, 0)
    }

    pub(crate) fn size_at_depth(
        &self,
        layout: &dyn LayoutProvider,
        depth: u32,
    ) -> Result<u32, TypeError> {
        // offsets are checked, so the end of the last field fits
        Ok(self
            .fields_at_depth(layout, depth)?
            .last()
            .map_or(0, |f| f.offset + f.size))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Two structs: `Pair<T> { T a; T b; }` and `Mixed { u8 tag; i32 value; i16* next; }`.
    pub(crate) struct TestLayout {
        pointer_size: u32,
        pub pair_id: StructId,
        pub mixed_id: StructId,
        pair_params: Vec<String>,
        pair_fields: Vec<CompiledField>,
        mixed_fields: Vec<CompiledField>,
    }

    impl TestLayout {
        pub(crate) fn new(pointer_size: u32) -> Self {
            let field = |name: &str, ty: GeneralType| CompiledField {
                name: name.to_string(),
                ty,
                location: Location::default(),
            };
            Self {
                pointer_size,
                pair_id: StructId(0),
                mixed_id: StructId(1),
                pair_params: vec!["T".to_string()],
                pair_fields: vec![
                    field("a", GeneralType::generic("T")),
                    field("b", GeneralType::generic("T")),
                ],
                mixed_fields: vec![
                    field("tag", GeneralType::U8),
                    field("value", GeneralType::I32),
                    field("next", GeneralType::pointer(GeneralType::I16)),
                ],
            }
        }
    }

    impl RuntimeInfoProvider for TestLayout {
        fn pointer_size(&self) -> u32 {
            self.pointer_size
        }
    }

    impl LayoutProvider for TestLayout {
        fn struct_template_parameters(&self, id: StructId) -> &[String] {
            if id == self.pair_id {
                self.pair_params.as_slice()
            } else {
                &[]
            }
        }

        fn struct_fields(&self, id: StructId) -> &[CompiledField] {
            if id == self.pair_id {
                self.pair_fields.as_slice()
            } else {
                self.mixed_fields.as_slice()
            }
        }
    }

    fn pair_of(layout: &TestLayout, ty: GeneralType) -> StructType {
        let mut args = TypeArguments::new();
        args.insert("T".to_string(), ty);
        StructType {
            id: layout.pair_id,
            name: "Pair".to_string(),
            type_arguments: args,
        }
    }

    #[test]
    fn test_pair_instantiation_sizes() {
        let layout = TestLayout::new(4);
        assert_eq!(pair_of(&layout, GeneralType::I32).size(&layout).unwrap(), 8);
        assert_eq!(pair_of(&layout, GeneralType::CHAR).size(&layout).unwrap(), 4);
    }

    #[test]
    fn test_offsets_are_cumulative() {
        let layout = TestLayout::new(4);
        let mixed = StructType {
            id: layout.mixed_id,
            name: "Mixed".to_string(),
            type_arguments: TypeArguments::new(),
        };
        let fields = mixed.fields(&layout).unwrap();
        let offsets: Vec<u32> = fields.iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 1, 5]);
        for pair in fields.windows(2) {
            assert_eq!(pair[0].offset + pair[0].size, pair[1].offset);
        }
        assert_eq!(mixed.size(&layout).unwrap(), 9);
        assert_eq!(mixed.field_offset("next", &layout).unwrap(), 5);
    }

    #[test]
    fn test_missing_field() {
        let layout = TestLayout::new(4);
        let pair = pair_of(&layout, GeneralType::U8);
        assert!(matches!(
            pair.field_offset("c", &layout),
            Err(TypeError::FieldNotFound { .. })
        ));
    }

    #[test]
    fn test_oversized_layouts_are_rejected() {
        let layout = TestLayout::new(4);
        let big = GeneralType::array(GeneralType::I64, Some(1_000_000_000));
        assert!(matches!(big.size(&layout), Err(TypeError::TooLarge(_))));

        let half = GeneralType::array(GeneralType::U8, Some(1 << 31));
        assert_eq!(half.size(&layout).unwrap(), 1 << 31);
        let pair = pair_of(&layout, half);
        let err = pair.size(&layout).unwrap_err();
        assert_eq!(err.to_string(), "type `Pair` is too large");
        assert!(!err.is_internal());
    }

    #[test]
    fn test_unbound_instantiation_is_type_argument_error() {
        let layout = TestLayout::new(4);
        let unbound = StructType {
            id: layout.pair_id,
            name: "Pair".to_string(),
            type_arguments: TypeArguments::new(),
        };
        let err = unbound.size(&layout).unwrap_err();
        assert_eq!(err.to_string(), "Type argument not found: `T`");
    }

    #[test]
    fn test_replace_type_rejects_foreign_parameter() {
        let layout = TestLayout::new(4);
        let pair = pair_of(&layout, GeneralType::U8);
        let err = pair
            .replace_type(&GeneralType::generic("U"), &layout)
            .unwrap_err();
        assert!(matches!(err, TypeError::TypeArgumentNotFound(name) if name == "U"));
    }

    #[test]
    fn test_size_is_stable() {
        let layout = TestLayout::new(4);
        let pair = pair_of(&layout, GeneralType::I64);
        let first = pair.size(&layout).unwrap();
        let second = pair.size(&layout).unwrap();
        assert_eq!(first, 16);
        assert_eq!(first, second);
    }
}
