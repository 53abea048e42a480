/// Version of the class file, which is used to verify that the JVM has the
/// necessary features to interpret the class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    pub minor_version: u16,
    pub major_version: u16,
}

impl Version {
    /// JVM class file version corresponding to Java SE 5
    pub const JAVA5: Version = Version {
        minor_version: 0,
        major_version: 49,
    };

    /// JVM class file version corresponding to Java SE 6 (the first version
    /// for which `StackMapTable` attributes may be emitted)
    pub const JAVA6: Version = Version {
        minor_version: 0,
        major_version: 50,
    };

    /// JVM class file version corresponding to Java SE 8 (released March 2014)
    pub const JAVA8: Version = Version {
        minor_version: 0,
        major_version: 52,
    };

    /// JVM class file version corresponding to Java SE 11
    pub const JAVA11: Version = Version {
        minor_version: 0,
        major_version: 55,
    };
}
