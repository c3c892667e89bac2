//! Tabla de símbolos con encadenamiento por profundidad.
//!
//! La tabla es un hash abierto de tamaño fijo. Cada cubeta es una
//! lista donde las inserciones ocurren al frente, de manera que al
//! buscar un nombre declarado en varios ámbitos anidados siempre se
//! encuentra primero la declaración más interna. El parser elimina
//! todas las entradas de una profundidad al cerrar el ámbito que les
//! corresponde.
//!
//! Las entradas se comparten mediante `Rc<RefCell<_>>`: el parser
//! conserva referencias a las entradas de procedimiento y módulo en
//! su pila de ámbitos para actualizar sus descriptores de marco
//! mientras el ámbito sigue abierto.

use std::{cell::RefCell, fmt::Write as _, rc::Rc};

use thiserror::Error;

/// Cantidad de cubetas de la tabla.
const TABLE_SIZE: usize = 211;

/// Redeclaración de un nombre en la misma profundidad.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("'{0}' has already been declared in this scope")]
pub struct Redeclaration(pub String);

/// Tipo de dato primitivo del lenguaje.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VarType {
    Char,
    Integer,
    Float,
}

impl VarType {
    /// Tamaño en bytes de un valor de este tipo.
    pub fn size(self) -> i32 {
        match self {
            VarType::Char => 1,
            VarType::Integer => 2,
            VarType::Float => 4,
        }
    }
}

/// Forma de paso de un parámetro.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PassMode {
    Value,
    Reference,
}

/// Valor de una constante declarada.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ConstValue {
    Int(i32),
    Real(f64),
}

/// Un parámetro formal de procedimiento, en orden de declaración.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Parameter {
    pub typ: VarType,
    pub mode: PassMode,
}

/// Descriptor de marco de activación de un procedimiento o módulo.
///
/// `size_of_locals` acumula únicamente constantes y variables
/// declaradas; los temporales reciben offset pero no se cuentan.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameInfo {
    pub size_of_params: i32,
    pub size_of_locals: i32,
    pub parameters: Vec<Parameter>,
}

/// Contenido específico de una entrada según su especie.
#[derive(Clone, Debug, PartialEq)]
pub enum EntryInfo {
    Constant {
        typ: VarType,
        offset: i32,
        value: ConstValue,
    },

    Variable {
        typ: VarType,
        offset: i32,
        size: i32,
        /// `Some` si la variable es un parámetro formal.
        parameter: Option<PassMode>,
    },

    Procedure(FrameInfo),
    Module(FrameInfo),

    /// Literal de hilera internado para la sección de datos.
    StringLiteral { value: String },
}

/// Una entrada de la tabla de símbolos.
#[derive(Clone, Debug, PartialEq)]
pub struct TableEntry {
    pub name: String,
    pub depth: u32,
    pub info: EntryInfo,
}

/// Referencia compartida a una entrada.
pub type EntryRef = Rc<RefCell<TableEntry>>;

/// Tabla de símbolos de ámbitos anidados.
pub struct SymbolTable {
    buckets: Vec<Vec<EntryRef>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            buckets: vec![Vec::new(); TABLE_SIZE],
        }
    }

    /// Inserta una nueva entrada, fallando si el mismo nombre ya
    /// existe en la misma profundidad.
    pub fn insert(
        &mut self,
        name: &str,
        depth: u32,
        info: EntryInfo,
    ) -> Result<EntryRef, Redeclaration> {
        let bucket = hash(name);
        let duplicate = self.buckets[bucket].iter().any(|entry| {
            let entry = entry.borrow();
            entry.depth == depth && entry.name == name
        });

        if duplicate {
            return Err(Redeclaration(name.to_owned()));
        }

        let entry = Rc::new(RefCell::new(TableEntry {
            name: name.to_owned(),
            depth,
            info,
        }));

        // Al frente, para que lo más interno gane las búsquedas
        self.buckets[bucket].insert(0, Rc::clone(&entry));
        Ok(entry)
    }

    /// Busca la declaración visible más interna de un nombre.
    pub fn lookup(&self, name: &str) -> Option<EntryRef> {
        self.buckets[hash(name)]
            .iter()
            .find(|entry| entry.borrow().name == name)
            .map(Rc::clone)
    }

    /// Entradas declaradas exactamente a la profundidad dada.
    pub fn entries_at_depth(&self, depth: u32) -> Vec<EntryRef> {
        self.buckets
            .iter()
            .flatten()
            .filter(|entry| entry.borrow().depth == depth)
            .map(Rc::clone)
            .collect()
    }

    /// Elimina todas las entradas de la profundidad dada.
    pub fn delete_depth(&mut self, depth: u32) {
        for bucket in &mut self.buckets {
            bucket.retain(|entry| entry.borrow().depth != depth);
        }
    }

    /// Listado legible de las entradas de una profundidad, para
    /// diagnóstico al cerrar cada ámbito.
    pub fn listing(&self, depth: u32) -> String {
        let mut listing = format!("=== symbols at depth {} ===\n", depth);

        for entry in self.entries_at_depth(depth) {
            let entry = entry.borrow();
            let _ = match &entry.info {
                EntryInfo::Constant { typ, offset, value } => writeln!(
                    listing,
                    "{:<17} const   {:?} offset={} value={:?}",
                    entry.name, typ, offset, value
                ),

                EntryInfo::Variable {
                    typ,
                    offset,
                    size,
                    parameter,
                } => writeln!(
                    listing,
                    "{:<17} var     {:?} offset={} size={} param={:?}",
                    entry.name, typ, offset, size, parameter
                ),

                EntryInfo::Procedure(frame) => writeln!(
                    listing,
                    "{:<17} proc    params={} locals={}",
                    entry.name, frame.size_of_params, frame.size_of_locals
                ),

                EntryInfo::Module(frame) => writeln!(
                    listing,
                    "{:<17} module  locals={}",
                    entry.name, frame.size_of_locals
                ),

                EntryInfo::StringLiteral { value } => {
                    writeln!(listing, "{:<17} string  {:?}", entry.name, value)
                }
            };
        }

        listing
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        SymbolTable::new()
    }
}

/// Dispersión por corrimiento-y-mezcla sobre los bytes del nombre.
fn hash(name: &str) -> usize {
    let mut hash: u32 = 0;

    for byte in name.bytes() {
        hash = (hash << 4).wrapping_add(u32::from(byte));
        let high = hash & 0xf000_0000;
        if high != 0 {
            hash ^= high >> 24;
            hash &= !high;
        }
    }

    hash as usize % TABLE_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variable(offset: i32) -> EntryInfo {
        EntryInfo::Variable {
            typ: VarType::Integer,
            offset,
            size: 2,
            parameter: None,
        }
    }

    #[test]
    fn rejects_redeclaration_at_same_depth() {
        let mut table = SymbolTable::new();
        table.insert("x", 1, variable(2)).unwrap();

        let error = table.insert("x", 1, variable(4)).unwrap_err();
        assert_eq!(error, Redeclaration(String::from("x")));
    }

    #[test]
    fn inner_declaration_shadows_outer() {
        let mut table = SymbolTable::new();
        table.insert("x", 1, variable(2)).unwrap();
        table.insert("x", 2, variable(0)).unwrap();

        let found = table.lookup("x").unwrap();
        assert_eq!(found.borrow().depth, 2);

        table.delete_depth(2);
        let found = table.lookup("x").unwrap();
        assert_eq!(found.borrow().depth, 1);
    }

    #[test]
    fn entries_at_depth_filters_by_depth() {
        let mut table = SymbolTable::new();
        table.insert("a", 1, variable(2)).unwrap();
        table.insert("b", 2, variable(2)).unwrap();
        table.insert("c", 2, variable(4)).unwrap();

        let mut names: Vec<String> = table
            .entries_at_depth(2)
            .iter()
            .map(|entry| entry.borrow().name.clone())
            .collect();

        names.sort();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn delete_depth_removes_every_entry() {
        let mut table = SymbolTable::new();
        table.insert("a", 2, variable(2)).unwrap();
        table.insert("b", 2, variable(4)).unwrap();
        table.insert("keep", 1, variable(2)).unwrap();

        table.delete_depth(2);
        assert!(table.lookup("a").is_none());
        assert!(table.lookup("b").is_none());
        assert!(table.lookup("keep").is_some());
    }

    #[test]
    fn frame_updates_are_visible_through_shared_refs() {
        let mut table = SymbolTable::new();
        let entry = table
            .insert("P", 1, EntryInfo::Procedure(FrameInfo::default()))
            .unwrap();

        if let EntryInfo::Procedure(frame) = &mut entry.borrow_mut().info {
            frame.size_of_locals = 6;
        }

        let found = table.lookup("P").unwrap();
        let found = found.borrow();
        match &found.info {
            EntryInfo::Procedure(frame) => assert_eq!(frame.size_of_locals, 6),
            other => panic!("unexpected entry: {:?}", other),
        }
    }
}
